//! Manufacturer-specific command class (0x72).

use std::io::Cursor;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::Node;

const COMMAND_GET: u8 = 0x04;
const COMMAND_REPORT: u8 = 0x05;

/// Manufacturer-specific façade.
pub struct ManufacturerSpecific<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the manufacturer-specific façade if the node supports the
    /// class.
    pub async fn manufacturer_specific(&self) -> Option<ManufacturerSpecific<'_>> {
        if self
            .supports_command_class(command_class::MANUFACTURER_SPECIFIC)
            .await
        {
            Some(ManufacturerSpecific { node: self })
        } else {
            None
        }
    }
}

impl ManufacturerSpecific<'_> {
    /// Queries the manufacturer id, product type and product id.
    pub async fn get(&self) -> Result<(u16, u16, u16)> {
        let report = self
            .node
            .send_and_await(
                command_class::MANUFACTURER_SPECIFIC,
                &[COMMAND_GET],
                COMMAND_REPORT,
                None,
            )
            .await?;

        let data = &report.command.data;
        if data.len() != 6 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let mut cursor = Cursor::new(&data[..]);
        Ok((cursor.get_u16(), cursor.get_u16(), cursor.get_u16()))
    }
}
