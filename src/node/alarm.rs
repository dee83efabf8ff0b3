//! Alarm / notification command class (0x71).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node, ReportFilter};

const COMMAND_GET: u8 = 0x04;
const COMMAND_REPORT: u8 = 0x05;
const COMMAND_SET: u8 = 0x06;
const COMMAND_SUPPORTED_GET: u8 = 0x07;
const COMMAND_SUPPORTED_REPORT: u8 = 0x08;

/// Alarm types.
pub mod alarm_type {
    pub const SMOKE: u8 = 0x01;
    pub const CARBON_MONOXIDE: u8 = 0x02;
    pub const CARBON_DIOXIDE: u8 = 0x03;
    pub const HEAT: u8 = 0x04;
    pub const WATER: u8 = 0x05;
    pub const ACCESS_CONTROL: u8 = 0x06;
    pub const BURGLAR: u8 = 0x07;
    pub const POWER_MANAGEMENT: u8 = 0x08;
    pub const SYSTEM: u8 = 0x09;
    pub const EMERGENCY: u8 = 0x0A;
    pub const CLOCK: u8 = 0x0B;
    pub const APPLIANCE: u8 = 0x0C;
    pub const HOME_HEALTH: u8 = 0x0D;
    /// Wildcard asking for the first supported type.
    pub const FIRST_SUPPORTED: u8 = 0xFF;
}

/// Alarm façade.
pub struct Alarm<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the alarm façade if the node supports the class.
    pub async fn alarm(&self) -> Option<Alarm<'_>> {
        if self.supports_command_class(command_class::ALARM).await {
            Some(Alarm { node: self })
        } else {
            None
        }
    }
}

impl Alarm<'_> {
    /// Activates an alarm of the given type.
    pub async fn activate(&self, alarm: u8) -> Result<()> {
        self.node
            .send(command_class::ALARM, &[COMMAND_SET, alarm, 0xFF])
            .await
    }

    /// Deactivates an alarm of the given type.
    pub async fn deactivate(&self, alarm: u8) -> Result<()> {
        self.node
            .send(command_class::ALARM, &[COMMAND_SET, alarm, 0x00])
            .await
    }

    /// Queries the alarm status for a type, ignoring reports for other
    /// types unless the wildcard was requested.
    pub async fn get(&self, alarm: u8) -> Result<(bool, u8)> {
        let filter: ReportFilter<'_> = &move |report| {
            !report.command.data.is_empty()
                && (alarm == alarm_type::FIRST_SUPPORTED || report.command.data[0] == alarm)
        };
        let report = self
            .node
            .send_and_await(
                command_class::ALARM,
                &[COMMAND_GET, alarm],
                COMMAND_REPORT,
                Some(filter),
            )
            .await?;
        self.parse_report(&report)
    }

    /// Checks whether a report is an alarm report.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT
    }

    /// Parses an alarm report into (active, alarm type).
    ///
    /// V1 reports are `| type | level |`. V2 notification reports prefix a
    /// 3-byte header and carry the level and type at indices 3 and 4; only
    /// those two fields are read, so anything past them is accepted as the
    /// variable-length V2 tail.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<(bool, u8)> {
        if report.command.class_id != command_class::ALARM {
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

        let data = &report.command.data;
        if data.len() < 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let (level, alarm) = if data.len() > 2 {
            if data.len() < 5 {
                return Err(Error::protocol(format!(
                    "bad V2 report length: {}",
                    data.len()
                )));
            }
            (data[3], data[4])
        } else {
            (data[1], data[0])
        };

        Ok((level != 0, alarm))
    }

    /// Queries the supported alarm types.
    pub async fn supported_types(&self) -> Result<(bool, Vec<u8>)> {
        let report = self
            .node
            .send_and_await(
                command_class::ALARM,
                &[COMMAND_SUPPORTED_GET],
                COMMAND_SUPPORTED_REPORT,
                None,
            )
            .await?;

        let data = &report.command.data;
        if data.is_empty() {
            return Err(Error::protocol("empty supported report"));
        }

        let notification_only = data[0] & 0x80 == 0;
        let mut types = Vec::new();
        let mut alarm = 0u8;
        for &mask in &data[1..] {
            for bit in 0..8 {
                if mask & (1 << bit) != 0 {
                    types.push(alarm);
                }
                alarm = alarm.wrapping_add(1);
            }
        }
        Ok((notification_only, types))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use crate::node::CommandData;

    fn report(data: &[u8]) -> ApplicationCommandData {
        ApplicationCommandData {
            status: 0,
            node_id: 7,
            command: CommandData {
                class_id: command_class::ALARM,
                command_id: COMMAND_REPORT,
                data: data.to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn test_parse_v1_report() {
        let (node, _api) = test_node(Vec::new());
        node.set_command_classes(vec![command_class::ALARM]).await;
        let alarm = node.alarm().await.unwrap();

        assert_eq!(
            alarm
                .parse_report(&report(&[alarm_type::SMOKE, 0xFF]))
                .unwrap(),
            (true, alarm_type::SMOKE)
        );
        assert_eq!(
            alarm
                .parse_report(&report(&[alarm_type::SMOKE, 0x00]))
                .unwrap(),
            (false, alarm_type::SMOKE)
        );
    }

    #[tokio::test]
    async fn test_parse_v2_report() {
        let (node, _api) = test_node(Vec::new());
        node.set_command_classes(vec![command_class::ALARM]).await;
        let alarm = node.alarm().await.unwrap();

        // V2 notification: V1 fields zeroed, status at 3, type at 4,
        // event and parameters trailing.
        let (active, alarm_kind) = alarm
            .parse_report(&report(&[
                0x00,
                0x00,
                0x00,
                0xFF,
                alarm_type::ACCESS_CONTROL,
                0x01,
                0x06,
            ]))
            .unwrap();
        assert!(active);
        assert_eq!(alarm_kind, alarm_type::ACCESS_CONTROL);

        // A minimal 5-byte V2 report is accepted too.
        let (active, alarm_kind) = alarm
            .parse_report(&report(&[0x00, 0x00, 0x00, 0x01, alarm_type::ACCESS_CONTROL]))
            .unwrap();
        assert!(active);
        assert_eq!(alarm_kind, alarm_type::ACCESS_CONTROL);
    }

    #[tokio::test]
    async fn test_parse_rejects_short_reports() {
        let (node, _api) = test_node(Vec::new());
        node.set_command_classes(vec![command_class::ALARM]).await;
        let alarm = node.alarm().await.unwrap();

        assert!(alarm.parse_report(&report(&[0x01])).is_err());
        assert!(alarm.parse_report(&report(&[0x00, 0x00, 0x00])).is_err());
        assert!(alarm.parse_report(&report(&[0x00, 0x00, 0x00, 0xFF])).is_err());
    }
}
