//! Binary switch command class (0x25).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node};

const COMMAND_SET: u8 = 0x01;
const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;

/// Binary switch façade.
pub struct BinarySwitch<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the binary-switch façade if the node supports the class.
    pub async fn binary_switch(&self) -> Option<BinarySwitch<'_>> {
        if self
            .supports_command_class(command_class::BINARY_SWITCH)
            .await
        {
            Some(BinarySwitch { node: self })
        } else {
            None
        }
    }
}

impl BinarySwitch<'_> {
    /// Turns the switch on.
    pub async fn on(&self) -> Result<()> {
        self.node
            .send(command_class::BINARY_SWITCH, &[COMMAND_SET, 0xFF])
            .await
    }

    /// Turns the switch off.
    pub async fn off(&self) -> Result<()> {
        self.node
            .send(command_class::BINARY_SWITCH, &[COMMAND_SET, 0x00])
            .await
    }

    /// Queries the current switch state.
    pub async fn is_on(&self) -> Result<bool> {
        let report = self
            .node
            .send_and_await(
                command_class::BINARY_SWITCH,
                &[COMMAND_GET],
                COMMAND_REPORT,
                None,
            )
            .await?;
        self.parse_report(&report)
    }

    /// Checks whether a report is a binary-switch state report.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT && report.command.data.len() == 1
    }

    /// Parses a state report into on/off.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<bool> {
        if report.command.class_id != command_class::BINARY_SWITCH {
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
        Ok(report.command.data[0] != 0)
    }
}
