//! Typed views over controller packets.
//!
//! A [`Packet`](crate::protocol::Packet) is just a framed byte blob; this
//! module turns the message types the driver speaks into request builders
//! and response decoders. Decoders validate the message type and body
//! length before touching any field, so a malformed reply surfaces as a
//! [`Error::Protocol`] instead of a panic.

use std::io::Cursor;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::protocol::packet::Packet;

/// Message type bytes understood by the driver core.
pub mod message_type {
    pub const SERIAL_API_GET_INIT_DATA: u8 = 0x02;
    pub const APPLICATION_COMMAND: u8 = 0x04;
    pub const ZW_GET_CONTROLLER_CAPABILITIES: u8 = 0x05;
    pub const SERIAL_API_GET_CAPABILITIES: u8 = 0x07;
    pub const ZW_SEND_DATA: u8 = 0x13;
    pub const GET_VERSION: u8 = 0x15;
    pub const MEMORY_GET_ID: u8 = 0x20;
    pub const ZW_GET_NODE_PROTOCOL_INFO: u8 = 0x41;
    pub const ZW_APPLICATION_UPDATE: u8 = 0x49;
    pub const ZW_REQUEST_NODE_INFO: u8 = 0x60;
}

/// Transmit option bits for send-data requests.
pub mod transmit_option {
    pub const ACK: u8 = 0x01;
    pub const LOW_POWER: u8 = 0x02;
    pub const AUTO_ROUTE: u8 = 0x04;
    pub const NO_ROUTE: u8 = 0x10;
    pub const EXPLORE: u8 = 0x20;
}

/// Transmit-complete status bytes in the send-data callback reply.
pub mod transmit_complete {
    pub const OK: u8 = 0x00;
    pub const NO_ACK: u8 = 0x01;
    pub const FAIL: u8 = 0x02;
    pub const NOT_IDLE: u8 = 0x03;
    pub const NO_ROUTE: u8 = 0x04;
}

/// Application-update status bytes.
pub mod update_status {
    pub const SUC_ID: u8 = 0x10;
    pub const DELETE_DONE: u8 = 0x20;
    pub const NEW_ID_ASSIGNED: u8 = 0x40;
    pub const ROUTE_PENDING: u8 = 0x80;
    pub const REQUEST_FAILED: u8 = 0x81;
    pub const REQUEST_DONE: u8 = 0x82;
    /// A node-info frame was received; the body carries the class list.
    pub const NODE_INFO_RECEIVED: u8 = 0x84;
}

/// Transmit options used for node-directed commands.
pub const DEFAULT_TRANSMIT_OPTIONS: u8 =
    transmit_option::ACK | transmit_option::AUTO_ROUTE | transmit_option::EXPLORE;

/// Number of bytes in the node-id bitmap (232 bits).
pub const NODE_BITMAP_LEN: usize = 29;

/// Checks that a node id is in the addressable range [1, 232].
#[must_use]
pub const fn is_valid_node_id(node_id: u8) -> bool {
    node_id >= 1 && node_id <= 232
}

fn check_node_id(node_id: u8) -> Result<()> {
    if is_valid_node_id(node_id) {
        Ok(())
    } else {
        Err(Error::InvalidNodeId { node_id })
    }
}

fn check_reply(packet: &Packet, message_type: u8, body_len: usize) -> Result<()> {
    if packet.message_type != message_type {
        return Err(Error::protocol(format!(
            "bad message type: 0x{:02x} != 0x{:02x}",
            packet.message_type, message_type
        )));
    }
    if packet.body.len() != body_len {
        return Err(Error::protocol(format!(
            "bad body length for 0x{:02x}: {} != {}",
            message_type,
            packet.body.len(),
            body_len
        )));
    }
    Ok(())
}

// ==================== Request builders ====================

/// Builds a `GetVersion` request.
#[must_use]
pub fn get_version_request() -> Packet {
    Packet::request(message_type::GET_VERSION, Vec::new()).expect("empty body always fits")
}

/// Builds a `MemoryGetID` request.
#[must_use]
pub fn memory_get_id_request() -> Packet {
    Packet::request(message_type::MEMORY_GET_ID, Vec::new()).expect("empty body always fits")
}

/// Builds a `SerialAPIGetInitData` request.
#[must_use]
pub fn serial_api_get_init_data_request() -> Packet {
    Packet::request(message_type::SERIAL_API_GET_INIT_DATA, Vec::new())
        .expect("empty body always fits")
}

/// Builds a `SerialAPIGetCapabilities` request.
#[must_use]
pub fn serial_api_get_capabilities_request() -> Packet {
    Packet::request(message_type::SERIAL_API_GET_CAPABILITIES, Vec::new())
        .expect("empty body always fits")
}

/// Builds a `ZWGetControllerCapabilities` request.
#[must_use]
pub fn controller_capabilities_request() -> Packet {
    Packet::request(message_type::ZW_GET_CONTROLLER_CAPABILITIES, Vec::new())
        .expect("empty body always fits")
}

/// Builds a `ZWGetNodeProtocolInfo` request for a node.
pub fn node_protocol_info_request(node_id: u8) -> Result<Packet> {
    check_node_id(node_id)?;
    Ok(Packet::request(
        message_type::ZW_GET_NODE_PROTOCOL_INFO,
        vec![node_id],
    )?)
}

/// Builds a `ZWRequestNodeInfo` request for a node.
pub fn request_node_info_request(node_id: u8) -> Result<Packet> {
    check_node_id(node_id)?;
    Ok(Packet::request(
        message_type::ZW_REQUEST_NODE_INFO,
        vec![node_id],
    )?)
}

/// Builds a `ZWSendData` request carrying a command-class payload.
///
/// Body layout:
///
/// ```text
/// | node_id | payload_len + 1 | command_class | payload... | transmit_options |
/// ```
///
/// The callback id is deliberately absent: the transport appends one to
/// every send-data request so concurrent requests stay distinguishable,
/// and refuses requests that already carry one.
pub fn send_data_request(
    node_id: u8,
    command_class: u8,
    payload: &[u8],
    transmit_options: u8,
) -> Result<Packet> {
    check_node_id(node_id)?;
    if payload.len() > 0xFE {
        return Err(Error::protocol(format!(
            "send-data payload too long: {}",
            payload.len()
        )));
    }

    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(node_id);
    body.push(payload.len() as u8 + 1);
    body.push(command_class);
    body.extend_from_slice(payload);
    body.push(transmit_options);

    Ok(Packet::request(message_type::ZW_SEND_DATA, body)?)
}

// ==================== Response decoders ====================

/// Controller firmware version reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVersion {
    /// Version string, e.g. `"Z-Wave 2.78"`.
    pub info: String,
    /// Library type byte.
    pub library_type: u8,
}

/// Parses a `GetVersion` response.
pub fn get_version_response(packet: &Packet) -> Result<GetVersion> {
    check_reply(packet, message_type::GET_VERSION, 13)?;

    let info = String::from_utf8_lossy(&packet.body[0..11])
        .trim_end_matches('\0')
        .to_owned();
    Ok(GetVersion {
        info,
        library_type: packet.body[12],
    })
}

/// Controller home id / node id reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryGetId {
    pub home_id: u32,
    pub node_id: u8,
}

/// Parses a `MemoryGetID` response.
pub fn memory_get_id_response(packet: &Packet) -> Result<MemoryGetId> {
    check_reply(packet, message_type::MEMORY_GET_ID, 5)?;

    let mut cursor = Cursor::new(&packet.body[..]);
    Ok(MemoryGetId {
        home_id: cursor.get_u32(),
        node_id: cursor.get_u8(),
    })
}

/// Serial API capabilities reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialApiCapabilities {
    pub application_version: u8,
    pub application_revision: u8,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    /// Message types the controller accepts, decoded from the 32-byte
    /// bitmask (bit `i` set means message type `i + 1`).
    pub message_types: Vec<u8>,
}

/// Parses a `SerialAPIGetCapabilities` response.
pub fn serial_api_get_capabilities_response(packet: &Packet) -> Result<SerialApiCapabilities> {
    check_reply(packet, message_type::SERIAL_API_GET_CAPABILITIES, 40)?;

    let mut cursor = Cursor::new(&packet.body[..]);
    let application_version = cursor.get_u8();
    let application_revision = cursor.get_u8();
    let manufacturer_id = cursor.get_u16();
    let product_type = cursor.get_u16();
    let product_id = cursor.get_u16();

    let mut message_types = Vec::new();
    for (i, &mask) in packet.body[8..].iter().enumerate() {
        for bit in 0..8u8 {
            if mask & (1 << bit) != 0 {
                if i == 31 && bit == 7 {
                    return Err(Error::protocol("unexpected supported message type 256"));
                }
                message_types.push(1 + (i as u8) * 8 + bit);
            }
        }
    }

    Ok(SerialApiCapabilities {
        application_version,
        application_revision,
        manufacturer_id,
        product_type,
        product_id,
        message_types,
    })
}

/// Serial API init-data reply: protocol version, role flags and the bitmap
/// of known node ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialApiInitData {
    pub version: u8,
    pub capabilities: InitDataCapabilities,
    pub nodes: Vec<u8>,
}

/// Role flags from the init-data capabilities byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitDataCapabilities {
    pub slave: bool,
    pub timer_support: bool,
    pub secondary: bool,
    pub static_update: bool,
}

/// Parses a `SerialAPIGetInitData` response.
pub fn serial_api_get_init_data_response(packet: &Packet) -> Result<SerialApiInitData> {
    check_reply(
        packet,
        message_type::SERIAL_API_GET_INIT_DATA,
        3 + NODE_BITMAP_LEN + 2,
    )?;
    let body = &packet.body;

    let capabilities = body[1];
    if usize::from(body[2]) != NODE_BITMAP_LEN {
        return Err(Error::protocol(format!(
            "bad node bitmap length: {}",
            body[2]
        )));
    }

    Ok(SerialApiInitData {
        version: body[0],
        capabilities: InitDataCapabilities {
            slave: capabilities & 0x01 != 0,
            timer_support: capabilities & 0x02 != 0,
            secondary: capabilities & 0x04 != 0,
            static_update: capabilities & 0x08 != 0,
        },
        nodes: decode_node_bitmap(&body[3..3 + NODE_BITMAP_LEN]),
        // body[32..34] are chip type/version, unused by the driver.
    })
}

/// Decodes a node-id bitmap, LSB-first per byte; bit `i` set means node
/// `i + 1` is present.
#[must_use]
pub fn decode_node_bitmap(bitmap: &[u8]) -> Vec<u8> {
    let mut nodes = Vec::new();
    for (i, &mask) in bitmap.iter().enumerate() {
        for bit in 0..8u8 {
            if mask & (1 << bit) != 0 {
                nodes.push(1 + (i as u8) * 8 + bit);
            }
        }
    }
    nodes
}

/// Controller role capabilities reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerCapabilities {
    pub secondary: bool,
    pub non_standard_home_id: bool,
    pub suc_id_server: bool,
    pub was_primary: bool,
    pub static_update_controller: bool,
}

/// Parses a `ZWGetControllerCapabilities` response.
pub fn controller_capabilities_response(packet: &Packet) -> Result<ControllerCapabilities> {
    check_reply(packet, message_type::ZW_GET_CONTROLLER_CAPABILITIES, 1)?;

    let capabilities = packet.body[0];
    Ok(ControllerCapabilities {
        secondary: capabilities & 0x01 != 0,
        non_standard_home_id: capabilities & 0x02 != 0,
        suc_id_server: capabilities & 0x04 != 0,
        was_primary: capabilities & 0x08 != 0,
        static_update_controller: capabilities & 0x10 != 0,
    })
}

/// Node protocol info reply: radio capabilities and device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeProtocolInfo {
    /// Whether the node's radio is always listening.
    pub listening: bool,
    pub basic_class: u8,
    pub generic_class: u8,
    pub specific_class: u8,
}

/// Parses a `ZWGetNodeProtocolInfo` response.
pub fn node_protocol_info_response(packet: &Packet) -> Result<NodeProtocolInfo> {
    check_reply(packet, message_type::ZW_GET_NODE_PROTOCOL_INFO, 6)?;
    let body = &packet.body;

    // body[1] and body[2] carry reserved capability/security bits.
    Ok(NodeProtocolInfo {
        listening: body[0] & 0x80 != 0,
        basic_class: body[3],
        generic_class: body[4],
        specific_class: body[5],
    })
}

/// Parses a `ZWRequestNodeInfo` response, returning the submission status.
///
/// The actual node info arrives later as an unsolicited application update;
/// this short reply only confirms that the controller queued the request.
pub fn request_node_info_response(packet: &Packet) -> Result<u8> {
    check_reply(packet, message_type::ZW_REQUEST_NODE_INFO, 1)?;
    Ok(packet.body[0])
}

/// Send-data completion reply carrying the correlation id and the mesh
/// delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendDataReply {
    pub callback_id: u8,
    pub status: u8,
}

/// Parses the second (callback) stage of a `ZWSendData` reply.
pub fn send_data_response(packet: &Packet) -> Result<SendDataReply> {
    check_reply(packet, message_type::ZW_SEND_DATA, 4)?;

    Ok(SendDataReply {
        callback_id: packet.body[0],
        status: packet.body[1],
    })
}

/// An unsolicited node-originated command report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCommand {
    pub status: u8,
    pub node_id: u8,
    /// Command class id, command id and command data.
    pub body: Vec<u8>,
}

/// Parses an `ApplicationCommand` packet.
pub fn application_command_response(packet: &Packet) -> Result<ApplicationCommand> {
    if packet.message_type != message_type::APPLICATION_COMMAND {
        return Err(Error::protocol(format!(
            "bad message type: 0x{:02x}",
            packet.message_type
        )));
    }
    let body = &packet.body;
    if body.len() < 3 {
        return Err(Error::protocol(format!(
            "application command too short: {}",
            body.len()
        )));
    }
    if body.len() - 3 != usize::from(body[2]) {
        return Err(Error::protocol(format!(
            "bad application command payload length: {}",
            body[2]
        )));
    }

    Ok(ApplicationCommand {
        status: body[0],
        node_id: body[1],
        body: body[3..].to_vec(),
    })
}

/// An unsolicited node-state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationUpdate {
    /// One of the [`update_status`] constants.
    pub status: u8,
    pub node_id: u8,
    pub body: Vec<u8>,
}

/// Parses a `ZWApplicationUpdate` packet.
pub fn application_update_response(packet: &Packet) -> Result<ApplicationUpdate> {
    if packet.message_type != message_type::ZW_APPLICATION_UPDATE {
        return Err(Error::protocol(format!(
            "bad message type: 0x{:02x}",
            packet.message_type
        )));
    }
    let body = &packet.body;
    if body.len() < 3 {
        return Err(Error::protocol(format!(
            "application update too short: {}",
            body.len()
        )));
    }
    if body.len() - 3 != usize::from(body[2]) {
        return Err(Error::protocol(format!(
            "bad application update payload length: {}",
            body[2]
        )));
    }

    Ok(ApplicationUpdate {
        status: body[0],
        node_id: body[1],
        body: body[3..].to_vec(),
    })
}
