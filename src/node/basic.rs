//! Basic command class (0x20).
//!
//! The lowest common denominator: every actuator understands a basic set
//! and get. V2 reports add a target value and a transition duration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node};
use crate::protocol::encoding::decode_duration;

const COMMAND_SET: u8 = 0x01;
const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;

/// Basic command-class façade.
pub struct Basic<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the basic façade if the node supports the class.
    pub async fn basic(&self) -> Option<Basic<'_>> {
        if self.supports_command_class(command_class::BASIC).await {
            Some(Basic { node: self })
        } else {
            None
        }
    }
}

impl Basic<'_> {
    /// Sets the value.
    pub async fn set(&self, value: u8) -> Result<()> {
        self.node
            .send(command_class::BASIC, &[COMMAND_SET, value])
            .await
    }

    /// Gets the value.
    pub async fn get(&self) -> Result<u8> {
        let report = self
            .node
            .send_and_await(command_class::BASIC, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;
        self.parse_report(&report)
    }

    /// Checks whether a report can be handled by [`Self::parse_report`].
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT && report.command.data.len() == 1
    }

    /// Parses a V1 value report.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<u8> {
        check_report(report, 1)?;
        Ok(report.command.data[0])
    }

    /// Gets the value, expecting a V2 report with target value and
    /// remaining transition duration.
    pub async fn get_v2(&self) -> Result<(u8, u8, Duration)> {
        let report = self
            .node
            .send_and_await(command_class::BASIC, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;
        self.parse_report_v2(&report)
    }

    /// Checks whether a report can be handled by [`Self::parse_report_v2`].
    #[must_use]
    pub fn is_report_v2(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT && report.command.data.len() == 3
    }

    /// Parses a V2 report into current value, target value and duration.
    pub fn parse_report_v2(&self, report: &ApplicationCommandData) -> Result<(u8, u8, Duration)> {
        check_report(report, 3)?;
        let data = &report.command.data;
        Ok((data[0], data[1], decode_duration(data[2])))
    }
}

fn check_report(report: &ApplicationCommandData, expected_len: usize) -> Result<()> {
    if report.command.class_id != command_class::BASIC {
        return Err(Error::protocol(format!(
            "bad report class: 0x{:02x}",
            report.command.class_id
        )));
    }
    if report.command.command_id != COMMAND_REPORT {
        return Err(Error::protocol(format!(
            "bad report command: 0x{:02x}",
            report.command.command_id
        )));
    }
    if report.command.data.len() != expected_len {
        return Err(Error::protocol(format!(
            "bad report length: {} != {expected_len}",
            report.command.data.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use crate::node::CommandData;

    fn report(command_id: u8, data: &[u8]) -> ApplicationCommandData {
        ApplicationCommandData {
            status: 0,
            node_id: 5,
            command: CommandData {
                class_id: command_class::BASIC,
                command_id,
                data: data.to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn test_facade_requires_class_support() {
        let (node, _api) = test_node(Vec::new());
        assert!(node.basic().await.is_none());

        node.set_command_classes(vec![command_class::BASIC]).await;
        assert!(node.basic().await.is_some());
    }

    #[tokio::test]
    async fn test_parse_report() {
        let (node, _api) = test_node(Vec::new());
        node.set_command_classes(vec![command_class::BASIC]).await;
        let basic = node.basic().await.unwrap();

        assert!(basic.is_report(&report(COMMAND_REPORT, &[0x63])));
        assert!(!basic.is_report(&report(COMMAND_SET, &[0x63])));
        assert_eq!(basic.parse_report(&report(COMMAND_REPORT, &[0x63])).unwrap(), 0x63);
        assert!(basic.parse_report(&report(COMMAND_REPORT, &[])).is_err());
    }

    #[tokio::test]
    async fn test_parse_report_v2() {
        let (node, _api) = test_node(Vec::new());
        node.set_command_classes(vec![command_class::BASIC]).await;
        let basic = node.basic().await.unwrap();

        let v2 = report(COMMAND_REPORT, &[0x00, 0x63, 0x05]);
        assert!(basic.is_report_v2(&v2));
        let (current, target, duration) = basic.parse_report_v2(&v2).unwrap();
        assert_eq!(current, 0x00);
        assert_eq!(target, 0x63);
        assert_eq!(duration, Duration::from_secs(5));
    }
}
