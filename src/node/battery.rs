//! Battery command class (0x80).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node};

const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;

/// Battery façade.
pub struct Battery<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the battery façade if the node supports the class.
    pub async fn battery(&self) -> Option<Battery<'_>> {
        if self.supports_command_class(command_class::BATTERY).await {
            Some(Battery { node: self })
        } else {
            None
        }
    }
}

impl Battery<'_> {
    /// Queries the battery, returning (low-battery warning, level).
    pub async fn get(&self) -> Result<(bool, u8)> {
        let report = self
            .node
            .send_and_await(command_class::BATTERY, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;
        self.parse_report(&report)
    }

    /// Checks whether a report is a battery report.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT
    }

    /// Parses a battery report. The level byte is [0, 100], with 0xFF as
    /// the low-battery sentinel.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<(bool, u8)> {
        if report.command.class_id != command_class::BATTERY {
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
        if report.command.data.len() != 1 {
            return Err(Error::protocol(format!(
                "bad report length: {}",
                report.command.data.len()
            )));
        }

        let level = report.command.data[0];
        if level == 0xFF {
            Ok((true, 0))
        } else {
            Ok((false, level))
        }
    }
}
