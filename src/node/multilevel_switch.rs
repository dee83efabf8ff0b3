//! Multi-level switch command class (0x26).
//!
//! Levels run [0, 99]; 0xFF restores the most recent non-zero level.
//! V2 variants add a transition duration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node};
use crate::protocol::encoding::encode_duration;

const COMMAND_SET: u8 = 0x01;
const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;
const COMMAND_START_LEVEL_CHANGE: u8 = 0x04;
const COMMAND_STOP_LEVEL_CHANGE: u8 = 0x05;

/// Multi-level switch façade.
pub struct MultiLevelSwitch<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the multi-level-switch façade if the node supports the class.
    pub async fn multilevel_switch(&self) -> Option<MultiLevelSwitch<'_>> {
        if self
            .supports_command_class(command_class::MULTI_LEVEL_SWITCH)
            .await
        {
            Some(MultiLevelSwitch { node: self })
        } else {
            None
        }
    }
}

fn check_level(value: u8) -> Result<()> {
    if value > 99 && value < 0xFF {
        return Err(Error::protocol("level must be in [0, 99] or 255"));
    }
    Ok(())
}

impl MultiLevelSwitch<'_> {
    /// Turns the switch on to the most recent non-zero level.
    pub async fn on(&self) -> Result<()> {
        self.node
            .send(command_class::MULTI_LEVEL_SWITCH, &[COMMAND_SET, 0xFF])
            .await
    }

    /// Turns the switch off.
    pub async fn off(&self) -> Result<()> {
        self.node
            .send(command_class::MULTI_LEVEL_SWITCH, &[COMMAND_SET, 0x00])
            .await
    }

    /// Queries whether the level is non-zero.
    pub async fn is_on(&self) -> Result<bool> {
        Ok(self.get().await? != 0)
    }

    /// Queries the current level.
    pub async fn get(&self) -> Result<u8> {
        let report = self
            .node
            .send_and_await(
                command_class::MULTI_LEVEL_SWITCH,
                &[COMMAND_GET],
                COMMAND_REPORT,
                None,
            )
            .await?;
        self.parse_report(&report)
    }

    /// Sets the level.
    pub async fn set(&self, value: u8) -> Result<()> {
        check_level(value)?;
        self.node
            .send(command_class::MULTI_LEVEL_SWITCH, &[COMMAND_SET, value])
            .await
    }

    /// Sets the level with a transition duration.
    pub async fn set_with_duration(&self, value: u8, duration: Duration) -> Result<()> {
        check_level(value)?;
        let duration_byte = encode_duration(duration)?;
        self.node
            .send(
                command_class::MULTI_LEVEL_SWITCH,
                &[COMMAND_SET, value, duration_byte],
            )
            .await
    }

    /// Starts a level change from `start`, going up or down.
    pub async fn start(&self, up: bool, ignore_start: bool, start: u8) -> Result<()> {
        check_level(start)?;
        let flags = level_change_flags(up, ignore_start);
        self.node
            .send(
                command_class::MULTI_LEVEL_SWITCH,
                &[COMMAND_START_LEVEL_CHANGE, flags, start],
            )
            .await
    }

    /// Starts a level change with a transition duration.
    pub async fn start_with_duration(
        &self,
        up: bool,
        ignore_start: bool,
        start: u8,
        duration: Duration,
    ) -> Result<()> {
        check_level(start)?;
        let duration_byte = encode_duration(duration)?;
        let flags = level_change_flags(up, ignore_start);
        self.node
            .send(
                command_class::MULTI_LEVEL_SWITCH,
                &[COMMAND_START_LEVEL_CHANGE, flags, start, duration_byte],
            )
            .await
    }

    /// Stops an ongoing level change.
    pub async fn stop(&self) -> Result<()> {
        self.node
            .send(
                command_class::MULTI_LEVEL_SWITCH,
                &[COMMAND_STOP_LEVEL_CHANGE],
            )
            .await
    }

    /// Checks whether a report is a level report.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT && report.command.data.len() == 1
    }

    /// Parses a level report.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<u8> {
        if report.command.class_id != command_class::MULTI_LEVEL_SWITCH {
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
        Ok(report.command.data[0])
    }
}

fn level_change_flags(up: bool, ignore_start: bool) -> u8 {
    let mut flags = 0;
    if up {
        flags |= 1 << 6;
    }
    if ignore_start {
        flags |= 1 << 5;
    }
    flags
}
