//! Meter command class (0x32).
//!
//! Handles V1 through V4 report layouts: V2 adds rate type and
//! delta-time/previous-value, V3 widens the scale field, V4 moves
//! overflowing scales into a trailing byte.

use std::io::Cursor;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node, ReportFilter};
use crate::protocol::encoding::decode_float;

const COMMAND_GET: u8 = 0x01;
const COMMAND_REPORT: u8 = 0x02;
const COMMAND_SUPPORTED_GET: u8 = 0x03;
const COMMAND_SUPPORTED_REPORT: u8 = 0x04;
const COMMAND_RESET: u8 = 0x05;

/// Meter types.
pub mod meter_type {
    pub const ELECTRIC: u8 = 0x01;
    pub const GAS: u8 = 0x02;
    pub const WATER: u8 = 0x03;
    pub const HEATING: u8 = 0x04;
    pub const COOLING: u8 = 0x05;
}

/// Meter scales per type. Electric scales; gas and water reuse the low
/// values with their own units.
pub mod meter_scale {
    pub const ELECTRIC_KWH: u8 = 0x00;
    pub const ELECTRIC_KVAH: u8 = 0x01;
    pub const ELECTRIC_W: u8 = 0x02;
    pub const ELECTRIC_PULSE_COUNT: u8 = 0x03;
    pub const ELECTRIC_V: u8 = 0x04;
    pub const ELECTRIC_A: u8 = 0x05;
    pub const ELECTRIC_POWER_FACTOR: u8 = 0x06;
    pub const ELECTRIC_MST: u8 = 0x07;

    pub const GAS_CUBIC_METERS: u8 = 0x00;
    pub const GAS_CUBIC_FEET: u8 = 0x01;
    pub const GAS_PULSE_COUNT: u8 = 0x03;

    pub const WATER_CUBIC_METERS: u8 = 0x00;
    pub const WATER_CUBIC_FEET: u8 = 0x01;
    pub const WATER_US_GALLONS: u8 = 0x02;
    pub const WATER_PULSE_COUNT: u8 = 0x03;

    pub const HEATING_KWH: u8 = 0x00;
    pub const COOLING_KWH: u8 = 0x00;
}

/// Rate types (V2+).
pub mod rate_type {
    pub const NONE: u8 = 0x00;
    pub const IMPORT: u8 = 0x01;
    pub const EXPORT: u8 = 0x02;
}

/// A decoded meter reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterResult {
    pub meter_type: u8,
    pub scale: u8,
    pub rate_type: u8,
    pub value: f32,
    /// Seconds since `previous_value` was sampled; 0 when absent.
    pub delta_time: u16,
    pub previous_value: f32,
}

/// Meter façade.
pub struct Meter<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the meter façade if the node supports the class.
    pub async fn meter(&self) -> Option<Meter<'_>> {
        if self.supports_command_class(command_class::METER).await {
            Some(Meter { node: self })
        } else {
            None
        }
    }
}

impl Meter<'_> {
    /// Queries the meter's default reading.
    pub async fn get(&self) -> Result<MeterResult> {
        let report = self
            .node
            .send_and_await(command_class::METER, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;
        self.parse_report(&report)
    }

    /// Queries a reading in the requested scale (V2, scale in [0, 3]).
    pub async fn get_scaled(&self, scale: u8) -> Result<MeterResult> {
        if scale & 0x03 != scale {
            return Err(Error::protocol("scale out of range [0, 3]"));
        }
        self.get_filtered(&[COMMAND_GET, scale << 3], scale, None)
            .await
    }

    /// Queries a reading in the requested scale (V3, scale in [0, 7]).
    pub async fn get_scaled_v3(&self, scale: u8) -> Result<MeterResult> {
        if scale & 0x07 != scale {
            return Err(Error::protocol("scale out of range [0, 7]"));
        }
        self.get_filtered(&[COMMAND_GET, scale << 3], scale, None)
            .await
    }

    /// Queries a reading in the requested scale and rate type (V4).
    pub async fn get_scaled_v4(&self, scale: u8, rate: u8) -> Result<MeterResult> {
        if rate & 0x03 != rate {
            return Err(Error::protocol("rate type out of range [0, 3]"));
        }

        let mut payload = vec![COMMAND_GET, rate << 6];
        if scale <= 0x07 {
            payload[1] |= scale << 3;
        } else {
            // Scales past 7 escape into a trailing scale byte.
            payload[1] |= 0x07 << 3;
            payload.push(scale);
        }
        self.get_filtered(&payload, scale, Some(rate)).await
    }

    async fn get_filtered(
        &self,
        payload: &[u8],
        scale: u8,
        rate: Option<u8>,
    ) -> Result<MeterResult> {
        let filter: ReportFilter<'_> = &move |report| {
            self.parse_report(report).is_ok_and(|result| {
                result.scale == scale && rate.map_or(true, |rate| result.rate_type == rate)
            })
        };
        let report = self
            .node
            .send_and_await(command_class::METER, payload, COMMAND_REPORT, Some(filter))
            .await?;
        self.parse_report(&report)
    }

    /// Resets accumulated values.
    pub async fn reset(&self) -> Result<()> {
        self.node.send(command_class::METER, &[COMMAND_RESET]).await
    }

    /// Queries the supported meter capabilities: whether it can reset,
    /// its rate type, meter type and supported scales.
    pub async fn supported(&self) -> Result<(bool, u8, u8, Vec<u8>)> {
        let report = self
            .node
            .send_and_await(
                command_class::METER,
                &[COMMAND_SUPPORTED_GET],
                COMMAND_SUPPORTED_REPORT,
                None,
            )
            .await?;

        let data = &report.command.data;
        if data.len() < 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let can_reset = data[0] & 0x80 != 0;
        let rate = (data[0] >> 5) & 0x03;
        let meter = data[0] & 0x1F;

        let mut scales = Vec::new();
        let mut scale = 0u8;
        for bit in 0..7 {
            if data[1] & (1 << bit) != 0 {
                scales.push(scale);
            }
            scale += 1;
        }

        if data[1] & 0x80 != 0 {
            // V4: extra scale bytes follow a count byte.
            let scale_bytes = &data[2..];
            if scale_bytes.is_empty() {
                return Err(Error::protocol("scale bytes missing"));
            }
            if scale_bytes.len() - 1 != usize::from(scale_bytes[0]) {
                return Err(Error::protocol(format!(
                    "scale bytes size mismatch: {} != {}",
                    scale_bytes.len() - 1,
                    scale_bytes[0]
                )));
            }
            for &mask in &scale_bytes[1..] {
                for bit in 0..8 {
                    if mask & (1 << bit) != 0 {
                        scales.push(scale);
                    }
                    scale = scale.wrapping_add(1);
                }
            }
        } else if data.len() != 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        Ok((can_reset, rate, meter, scales))
    }

    /// Checks whether a report is a meter reading.
    #[must_use]
    pub fn is_report(&self, report: &ApplicationCommandData) -> bool {
        report.command.command_id == COMMAND_REPORT
    }

    /// Parses a meter reading, handling the V1-V4 layouts.
    pub fn parse_report(&self, report: &ApplicationCommandData) -> Result<MeterResult> {
        if report.command.class_id != command_class::METER {
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

        let mut result = MeterResult::default();

        let meter = data[0] & 0x1F;
        match meter {
            meter_type::ELECTRIC
            | meter_type::GAS
            | meter_type::WATER
            | meter_type::HEATING
            | meter_type::COOLING => result.meter_type = meter,
            other => return Err(Error::protocol(format!("unknown meter type: 0x{other:02x}"))),
        }

        // Zero for V1 reports.
        let rate = (data[0] >> 5) & 0x03;
        match rate {
            rate_type::NONE | rate_type::IMPORT | rate_type::EXPORT => result.rate_type = rate,
            other => return Err(Error::protocol(format!("unknown rate type: 0x{other:02x}"))),
        }

        let precision = (data[1] >> 5) & 0x07;
        let mut scale = (data[1] >> 3) & 0x03;
        if data[0] & 0x80 != 0 {
            // V3 carries the scale's third bit in the type byte.
            scale |= 0x04;
        }
        let size = usize::from(data[1] & 0x07);

        if data.len() < size + 2 {
            return Err(Error::protocol(format!(
                "report value truncated: {} < {}",
                data.len(),
                size + 2
            )));
        }

        let mut offset = 2;
        result.value = decode_float(&data[offset..offset + size], precision)?;
        offset += size;

        if data.len() > offset {
            if data.len() < offset + 2 {
                return Err(Error::protocol(format!(
                    "delta time truncated: {} < {}",
                    data.len(),
                    offset + 2
                )));
            }
            result.delta_time = Cursor::new(&data[offset..]).get_u16();
            offset += 2;
        }

        if result.delta_time > 0 && data.len() > offset {
            if data.len() < offset + size {
                return Err(Error::protocol(format!(
                    "previous value truncated: {} < {}",
                    data.len(),
                    offset + size
                )));
            }
            result.previous_value = decode_float(&data[offset..offset + size], precision)?;
            offset += size;
        }

        if data.len() > offset && scale == 0x07 {
            // V4: the real scale lives in the trailing byte.
            scale = data[offset];
        }
        result.scale = scale;

        check_scale(meter, scale)?;

        Ok(result)
    }
}

fn check_scale(meter: u8, scale: u8) -> Result<()> {
    let known = match meter {
        meter_type::ELECTRIC => scale <= meter_scale::ELECTRIC_MST,
        meter_type::GAS => matches!(scale, 0x00 | 0x01 | 0x03 | 0x07),
        meter_type::WATER => matches!(scale, 0x00..=0x03 | 0x07),
        meter_type::HEATING | meter_type::COOLING => scale == 0x00,
        _ => false,
    };
    if known {
        Ok(())
    } else {
        Err(Error::protocol(format!(
            "unknown scale 0x{scale:02x} for meter type 0x{meter:02x}"
        )))
    }
}
