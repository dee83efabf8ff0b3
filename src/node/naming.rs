//! Node naming and location command class (0x77).
//!
//! Names and locations are capped at 16 bytes. Only the ASCII encoding is
//! spoken here; UTF-16 reports are refused rather than mangled.

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{ApplicationCommandData, Node};

const COMMAND_NAME_SET: u8 = 0x01;
const COMMAND_NAME_GET: u8 = 0x02;
const COMMAND_NAME_REPORT: u8 = 0x03;
const COMMAND_LOCATION_SET: u8 = 0x04;
const COMMAND_LOCATION_GET: u8 = 0x05;
const COMMAND_LOCATION_REPORT: u8 = 0x06;

const ENCODING_ASCII: u8 = 0x00;
const ENCODING_EXTENDED_ASCII: u8 = 0x01;

const MAX_LENGTH: usize = 16;

/// Naming-and-location façade.
pub struct NamingAndLocation<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the naming façade if the node supports the class.
    pub async fn naming_and_location(&self) -> Option<NamingAndLocation<'_>> {
        if self
            .supports_command_class(command_class::NODE_NAMING_AND_LOCATION)
            .await
        {
            Some(NamingAndLocation { node: self })
        } else {
            None
        }
    }
}

impl NamingAndLocation<'_> {
    /// Queries the node's name.
    pub async fn get_name(&self) -> Result<String> {
        let report = self
            .node
            .send_and_await(
                command_class::NODE_NAMING_AND_LOCATION,
                &[COMMAND_NAME_GET],
                COMMAND_NAME_REPORT,
                None,
            )
            .await?;
        parse_string_report(&report)
    }

    /// Sets the node's name.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        let payload = encode_string(COMMAND_NAME_SET, name)?;
        self.node
            .send(command_class::NODE_NAMING_AND_LOCATION, &payload)
            .await
    }

    /// Queries the node's location.
    pub async fn get_location(&self) -> Result<String> {
        let report = self
            .node
            .send_and_await(
                command_class::NODE_NAMING_AND_LOCATION,
                &[COMMAND_LOCATION_GET],
                COMMAND_LOCATION_REPORT,
                None,
            )
            .await?;
        parse_string_report(&report)
    }

    /// Sets the node's location.
    pub async fn set_location(&self, location: &str) -> Result<()> {
        let payload = encode_string(COMMAND_LOCATION_SET, location)?;
        self.node
            .send(command_class::NODE_NAMING_AND_LOCATION, &payload)
            .await
    }
}

fn encode_string(command: u8, value: &str) -> Result<Vec<u8>> {
    if !value.is_ascii() {
        return Err(Error::protocol("only ASCII names are supported"));
    }
    if value.len() > MAX_LENGTH {
        return Err(Error::protocol(format!(
            "name too long: {} > {MAX_LENGTH}",
            value.len()
        )));
    }

    let mut payload = vec![command, ENCODING_ASCII];
    payload.extend_from_slice(value.as_bytes());
    Ok(payload)
}

fn parse_string_report(report: &ApplicationCommandData) -> Result<String> {
    let data = &report.command.data;
    if data.is_empty() {
        return Err(Error::protocol("empty naming report"));
    }

    let encoding = data[0] & 0x07;
    if encoding != ENCODING_ASCII && encoding != ENCODING_EXTENDED_ASCII {
        return Err(Error::protocol(format!(
            "unsupported name encoding: 0x{encoding:02x}"
        )));
    }

    Ok(String::from_utf8_lossy(&data[1..])
        .trim_end_matches('\0')
        .to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::CommandData;

    fn report(data: &[u8]) -> ApplicationCommandData {
        ApplicationCommandData {
            status: 0,
            node_id: 5,
            command: CommandData {
                class_id: command_class::NODE_NAMING_AND_LOCATION,
                command_id: COMMAND_NAME_REPORT,
                data: data.to_vec(),
            },
        }
    }

    #[test]
    fn test_encode_string_validates() {
        assert!(encode_string(COMMAND_NAME_SET, "kitchen").is_ok());
        assert!(encode_string(COMMAND_NAME_SET, "a-very-long-name-indeed").is_err());
        assert!(encode_string(COMMAND_NAME_SET, "küche").is_err());
    }

    #[test]
    fn test_parse_string_report() {
        let mut data = vec![ENCODING_ASCII];
        data.extend_from_slice(b"kitchen\0\0");
        assert_eq!(parse_string_report(&report(&data)).unwrap(), "kitchen");

        assert!(parse_string_report(&report(&[])).is_err());
        assert!(parse_string_report(&report(&[0x02, b'x'])).is_err());
    }
}
