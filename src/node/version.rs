//! Version command class (0x86).

use std::io::Cursor;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{Node, ReportFilter};

const COMMAND_GET: u8 = 0x11;
const COMMAND_REPORT: u8 = 0x12;
const COMMAND_CLASS_GET: u8 = 0x13;
const COMMAND_CLASS_REPORT: u8 = 0x14;

/// Version façade.
pub struct Version<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the version façade if the node supports the class.
    pub async fn version(&self) -> Option<Version<'_>> {
        if self.supports_command_class(command_class::VERSION).await {
            Some(Version { node: self })
        } else {
            None
        }
    }
}

impl Version<'_> {
    /// Queries the node's library type, protocol version and application
    /// version.
    pub async fn get(&self) -> Result<(u8, u16, u16)> {
        let report = self
            .node
            .send_and_await(command_class::VERSION, &[COMMAND_GET], COMMAND_REPORT, None)
            .await?;

        let data = &report.command.data;
        if data.len() != 5 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }

        let mut cursor = Cursor::new(&data[..]);
        Ok((cursor.get_u8(), cursor.get_u16(), cursor.get_u16()))
    }

    /// Queries the version the node implements for a command class.
    ///
    /// Fails fast when the node never advertised the class, saving the
    /// radio round-trip and its timeout.
    pub async fn command_class_version(&self, class_id: u8) -> Result<u8> {
        if !self.node.supports_command_class(class_id).await {
            return Err(Error::protocol(format!(
                "node does not support class 0x{class_id:02x}"
            )));
        }

        let filter: ReportFilter<'_> =
            &move |report| !report.command.data.is_empty() && report.command.data[0] == class_id;
        let report = self
            .node
            .send_and_await(
                command_class::VERSION,
                &[COMMAND_CLASS_GET, class_id],
                COMMAND_CLASS_REPORT,
                Some(filter),
            )
            .await?;

        let data = &report.command.data;
        if data.len() != 2 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }
        Ok(data[1])
    }
}
