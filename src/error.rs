//! Error types for the zwave library.

use thiserror::Error;

/// The main error type for zwave operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Malformed or unexpected protocol data.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Request failed after exhausting the ACK retry budget.
    #[error("failed to send request after {attempts} attempts")]
    SendFailed { attempts: u32 },

    /// No matching response arrived after exhausting the response retry budget.
    #[error("no response after {attempts} attempts")]
    ResponseFailed { attempts: u32 },

    /// Operation timed out waiting for a report.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The controller is closed, or was closed while the request was in flight.
    #[error("controller closed")]
    Closed,

    /// The controller does not support this message type.
    #[error("message type 0x{message_type:02x} not supported by controller")]
    UnsupportedMessageType { message_type: u8 },

    /// Node id outside the valid range [1, 232].
    #[error("invalid node id: {node_id}")]
    InvalidNodeId { node_id: u8 },

    /// The controller reported no device behind this node id.
    #[error("node not found")]
    NodeNotFound,

    /// The mesh delivery of a send-data request failed.
    #[error("transmit failed with status 0x{status:02x}")]
    TransmitFailed { status: u8 },

    /// Node cache blob is malformed or has an incompatible schema.
    #[error("cache error: {message}")]
    Cache { message: String },
}

impl Error {
    /// Shorthand for a [`Error::Protocol`] with a formatted message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Frame-specific errors raised by the incremental parser and serialiser.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// First byte was none of SOF/ACK/NAK/CAN.
    #[error("bad preamble: 0x{0:02x}")]
    BadPreamble(u8),

    /// Length byte below the 3-byte minimum.
    #[error("bad length: {0} < 3")]
    BadLength(u8),

    /// Packet type byte was neither request nor response.
    #[error("bad packet type: 0x{0:02x}")]
    BadPacketType(u8),

    /// Computed checksum does not match the received one.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    ChecksumMismatch { expected: u8, got: u8 },

    /// Body exceeds the 252-byte maximum encodable in the length byte.
    #[error("body too long: {0} > 252 bytes")]
    BodyTooLong(usize),
}

/// Result type alias for zwave operations.
pub type Result<T> = std::result::Result<T, Error>;
