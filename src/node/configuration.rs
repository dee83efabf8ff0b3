//! Configuration command class (0x70).
//!
//! Parameters are device-defined and sized 1, 2 or 4 bytes; a node may
//! answer a get for an unknown parameter with a 1-byte zero, which
//! surfaces here as a length mismatch.

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{Node, ReportFilter};

const COMMAND_SET: u8 = 0x04;
const COMMAND_GET: u8 = 0x05;
const COMMAND_REPORT: u8 = 0x06;

/// Configuration façade.
pub struct Configuration<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the configuration façade if the node supports the class.
    pub async fn configuration(&self) -> Option<Configuration<'_>> {
        if self
            .supports_command_class(command_class::CONFIGURATION)
            .await
        {
            Some(Configuration { node: self })
        } else {
            None
        }
    }
}

impl Configuration<'_> {
    async fn get_value(&self, parameter: u8, size: u8) -> Result<Vec<u8>> {
        if size != 1 && size != 2 && size != 4 {
            return Err(Error::protocol(format!("bad parameter size: {size}")));
        }

        let filter: ReportFilter<'_> =
            &move |report| report.command.data.len() > 1 && report.command.data[0] == parameter;
        let report = self
            .node
            .send_and_await(
                command_class::CONFIGURATION,
                &[COMMAND_GET, parameter],
                COMMAND_REPORT,
                Some(filter),
            )
            .await?;

        let data = &report.command.data;
        if data.len() != 2 + usize::from(size) {
            return Err(Error::protocol(format!(
                "bad report length: {} != {}, parameter may not exist",
                data.len(),
                2 + size
            )));
        }
        if data[1] != size {
            return Err(Error::protocol(format!(
                "bad parameter size: {} != {size}",
                data[1]
            )));
        }
        Ok(data[2..].to_vec())
    }

    /// Gets a boolean parameter.
    pub async fn get_bool(&self, parameter: u8) -> Result<bool> {
        Ok(self.get_value(parameter, 1).await?[0] != 0)
    }

    /// Gets a 1-byte parameter.
    pub async fn get_byte(&self, parameter: u8) -> Result<u8> {
        Ok(self.get_value(parameter, 1).await?[0])
    }

    /// Gets a 2-byte parameter.
    pub async fn get_short(&self, parameter: u8) -> Result<u16> {
        let value = self.get_value(parameter, 2).await?;
        Ok(Cursor::new(value).get_u16())
    }

    /// Gets a 4-byte parameter.
    pub async fn get_int(&self, parameter: u8) -> Result<u32> {
        let value = self.get_value(parameter, 4).await?;
        Ok(Cursor::new(value).get_u32())
    }

    /// Sets a boolean parameter.
    pub async fn set_bool(&self, parameter: u8, value: bool) -> Result<()> {
        self.set_byte(parameter, u8::from(value)).await
    }

    /// Sets a 1-byte parameter.
    pub async fn set_byte(&self, parameter: u8, value: u8) -> Result<()> {
        self.node
            .send(
                command_class::CONFIGURATION,
                &[COMMAND_SET, parameter, 1, value],
            )
            .await
    }

    /// Sets a 2-byte parameter.
    pub async fn set_short(&self, parameter: u8, value: u16) -> Result<()> {
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u8(COMMAND_SET);
        payload.put_u8(parameter);
        payload.put_u8(2);
        payload.put_u16(value);
        self.node
            .send(command_class::CONFIGURATION, &payload)
            .await
    }

    /// Sets a 4-byte parameter.
    pub async fn set_int(&self, parameter: u8, value: u32) -> Result<()> {
        let mut payload = BytesMut::with_capacity(7);
        payload.put_u8(COMMAND_SET);
        payload.put_u8(parameter);
        payload.put_u8(4);
        payload.put_u32(value);
        self.node
            .send(command_class::CONFIGURATION, &payload)
            .await
    }
}
