//! Clock command class (0x81).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::Node;

const COMMAND_SET: u8 = 0x04;
const COMMAND_GET: u8 = 0x05;
const COMMAND_REPORT: u8 = 0x06;

/// Clock façade.
pub struct Clock<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the clock façade if the node supports the class.
    pub async fn clock(&self) -> Option<Clock<'_>> {
        if self.supports_command_class(command_class::CLOCK).await {
            Some(Clock { node: self })
        } else {
            None
        }
    }
}

impl Clock<'_> {
    /// Queries the clock, returning (weekday, hour, minute). Weekday 0
    /// means unknown, [1, 7] is Monday through Sunday.
    pub async fn get(&self) -> Result<(u8, u8, u8)> {
        let report = self
            .node
            .send_and_await(command_class::CLOCK, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;

        let data = &report.command.data;
        if data.len() != 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let weekday = (data[0] >> 5) & 0x07;
        let hour = data[0] & 0x1F;
        let minute = data[1];
        if hour > 23 {
            return Err(Error::protocol(format!("bad hour: {hour}")));
        }
        if minute > 59 {
            return Err(Error::protocol(format!("bad minute: {minute}")));
        }
        Ok((weekday, hour, minute))
    }

    /// Sets the clock. Weekday must be in [1, 7]; the unknown weekday the
    /// report format allows is refused here because devices reject it.
    pub async fn set(&self, weekday: u8, hour: u8, minute: u8) -> Result<()> {
        if !(1..=7).contains(&weekday) {
            return Err(Error::protocol(format!("bad weekday: {weekday}")));
        }
        if hour > 23 {
            return Err(Error::protocol(format!("bad hour: {hour}")));
        }
        if minute > 59 {
            return Err(Error::protocol(format!("bad minute: {minute}")));
        }

        self.node
            .send(
                command_class::CLOCK,
                &[COMMAND_SET, (weekday << 5) | hour, minute],
            )
            .await
    }
}
