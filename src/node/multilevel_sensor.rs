//! Multi-level sensor command class (0x31).
//!
//! Readings arrive as a type byte, a precision/scale/size byte and a
//! big-endian signed value decoded via the shared float encoding.

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node, ReportFilter};
use crate::protocol::encoding::decode_float;

const COMMAND_GET_SENSOR_TYPES: u8 = 0x01;
const COMMAND_REPORT_SENSOR_TYPES: u8 = 0x02;
const COMMAND_GET_SCALE_TYPES: u8 = 0x03;
const COMMAND_GET: u8 = 0x04;
const COMMAND_REPORT: u8 = 0x05;
const COMMAND_REPORT_SCALE_TYPES: u8 = 0x06;

/// Multi-level sensor types.
pub mod sensor_type {
    pub const TEMPERATURE: u8 = 0x01;
    pub const GENERAL: u8 = 0x02;
    pub const LUMINANCE: u8 = 0x03;
    pub const POWER: u8 = 0x04;
    pub const RELATIVE_HUMIDITY: u8 = 0x05;
    pub const VELOCITY: u8 = 0x06;
    pub const DIRECTION: u8 = 0x07;
    pub const ATMOSPHERIC_PRESSURE: u8 = 0x08;
    pub const BAROMETRIC_PRESSURE: u8 = 0x09;
    pub const SOLAR_RADIATION: u8 = 0x0A;
    pub const DEW_POINT: u8 = 0x0B;
    pub const RAIN_RATE: u8 = 0x0C;
    pub const TIDE_LEVEL: u8 = 0x0D;
    pub const WEIGHT: u8 = 0x0E;
    pub const VOLTAGE: u8 = 0x0F;
    pub const CURRENT: u8 = 0x10;
    pub const CO2: u8 = 0x11;
    pub const AIR_FLOW: u8 = 0x12;
    pub const TANK_CAPACITY: u8 = 0x13;
    pub const DISTANCE: u8 = 0x14;
    pub const ANGLE_POSITION: u8 = 0x15;
    pub const ROTATION: u8 = 0x16;
    pub const WATER_TEMPERATURE: u8 = 0x17;
    pub const SOIL_TEMPERATURE: u8 = 0x18;
    pub const SEISMIC_INTENSITY: u8 = 0x19;
    pub const SEISMIC_MAGNITUDE: u8 = 0x1A;
    pub const ULTRAVIOLET: u8 = 0x1B;
    pub const ELECTRICAL_RESISTIVITY: u8 = 0x1C;
    pub const ELECTRICAL_CONDUCTIVITY: u8 = 0x1D;
    pub const LOUDNESS: u8 = 0x1E;
    pub const MOISTURE: u8 = 0x1F;
}

/// A decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiLevelSensorResult {
    pub sensor_type: u8,
    pub scale: u8,
    pub value: f32,
}

/// Multi-level sensor façade.
pub struct MultiLevelSensor<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the multi-level-sensor façade if the node supports the class.
    pub async fn multilevel_sensor(&self) -> Option<MultiLevelSensor<'_>> {
        if self
            .supports_command_class(command_class::MULTI_LEVEL_SENSOR)
            .await
        {
            Some(MultiLevelSensor { node: self })
        } else {
            None
        }
    }
}

impl MultiLevelSensor<'_> {
    /// Queries the sensor for its default reading.
    pub async fn get(&self) -> Result<MultiLevelSensorResult> {
        let report = self
            .node
            .send_and_await(
                command_class::MULTI_LEVEL_SENSOR,
                &[COMMAND_GET],
                COMMAND_REPORT,
                None,
            )
            .await?;
        self.parse_report(&report)
    }

    /// Checks whether a report is a sensor reading.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT
    }

    /// Parses a sensor reading.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<MultiLevelSensorResult> {
        if report.command.class_id != command_class::MULTI_LEVEL_SENSOR {
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
        if data.len() < 3 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let precision = (data[1] >> 5) & 0x07;
        let scale = (data[1] >> 3) & 0x03;
        let size = usize::from(data[1] & 0x07);
        if data.len() < 2 + size {
            return Err(Error::protocol(format!(
                "report value truncated: {} < {}",
                data.len(),
                2 + size
            )));
        }

        Ok(MultiLevelSensorResult {
            sensor_type: data[0],
            scale,
            value: decode_float(&data[2..2 + size], precision)?,
        })
    }

    /// Queries the list of supported sensor types.
    pub async fn supported_sensor_types(&self) -> Result<Vec<u8>> {
        let report = self
            .node
            .send_and_await(
                command_class::MULTI_LEVEL_SENSOR,
                &[COMMAND_GET_SENSOR_TYPES],
                COMMAND_REPORT_SENSOR_TYPES,
                None,
            )
            .await?;

        let mut sensors = Vec::new();
        let mut sensor = 1u8;
        for &mask in &report.command.data {
            for bit in 0..8 {
                if mask & (1 << bit) != 0 {
                    sensors.push(sensor);
                }
                sensor = sensor.wrapping_add(1);
            }
        }
        Ok(sensors)
    }

    /// Queries the supported scales for a sensor type.
    pub async fn supported_scale_types(&self, sensor_type: u8) -> Result<Vec<u8>> {
        let filter: ReportFilter<'_> =
            &move |report| !report.command.data.is_empty() && report.command.data[0] == sensor_type;
        let report = self
            .node
            .send_and_await(
                command_class::MULTI_LEVEL_SENSOR,
                &[COMMAND_GET_SCALE_TYPES, sensor_type],
                COMMAND_REPORT_SCALE_TYPES,
                Some(filter),
            )
            .await?;

        let data = &report.command.data;
        if data.len() != 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let mut scales = Vec::new();
        for bit in 0..8 {
            if data[1] & (1 << bit) != 0 {
                scales.push(bit);
            }
        }
        Ok(scales)
    }
}
