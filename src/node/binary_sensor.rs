//! Binary sensor command class (0x30).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node, ReportFilter};

const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;

/// Binary sensor types.
pub mod binary_sensor_type {
    pub const GENERAL: u8 = 0x01;
    pub const SMOKE: u8 = 0x02;
    pub const CARBON_MONOXIDE: u8 = 0x03;
    pub const CARBON_DIOXIDE: u8 = 0x04;
    pub const HEAT: u8 = 0x05;
    pub const WATER: u8 = 0x06;
    pub const FREEZE: u8 = 0x07;
    pub const TAMPER: u8 = 0x08;
    pub const AUX: u8 = 0x09;
    pub const DOOR_WINDOW: u8 = 0x0A;
    pub const TILT: u8 = 0x0B;
    pub const MOTION: u8 = 0x0C;
    pub const GLASS_BREAK: u8 = 0x0D;
    /// Wildcard asking for the first supported type.
    pub const FIRST_SUPPORTED: u8 = 0xFF;
}

/// Binary sensor façade.
pub struct BinarySensor<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the binary-sensor façade if the node supports the class.
    pub async fn binary_sensor(&self) -> Option<BinarySensor<'_>> {
        if self
            .supports_command_class(command_class::BINARY_SENSOR)
            .await
        {
            Some(BinarySensor { node: self })
        } else {
            None
        }
    }
}

impl BinarySensor<'_> {
    /// Queries the sensor.
    pub async fn is_active(&self) -> Result<bool> {
        let report = self
            .node
            .send_and_await(
                command_class::BINARY_SENSOR,
                &[COMMAND_GET],
                COMMAND_REPORT,
                None,
            )
            .await?;
        Ok(self.parse_report(&report)?.0)
    }

    /// Queries the sensor for a specific type (V2), filtering out reports
    /// for other types.
    pub async fn is_active_typed(&self, sensor_type: u8) -> Result<bool> {
        let filter: ReportFilter<'_> =
            &move |report| report.command.data.len() > 1 && report.command.data[1] == sensor_type;
        let report = self
            .node
            .send_and_await(
                command_class::BINARY_SENSOR,
                &[COMMAND_GET, sensor_type],
                COMMAND_REPORT,
                Some(filter),
            )
            .await?;
        Ok(self.parse_report(&report)?.0)
    }

    /// Checks whether a report is a binary-sensor report.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT
    }

    /// Parses a report into (active, sensor type). V1 reports carry no
    /// type byte and default to the general type.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<(bool, u8)> {
        if report.command.class_id != command_class::BINARY_SENSOR {
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
        if data.len() != 1 && data.len() != 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let active = data[0] == 0xFF;
        let sensor_type = if data.len() > 1 {
            data[1]
        } else {
            binary_sensor_type::GENERAL
        };
        Ok((active, sensor_type))
    }
}
