//! Incremental frame parser.
//!
//! The serial port delivers bytes in arbitrary chunks, so the parser is fed
//! one byte at a time and carries its state between calls. A completed
//! packet or a framing error both reset the state machine, so a corrupted
//! frame costs at most one NAK round-trip before the stream resynchronises.

use crate::error::FrameError;
use crate::protocol::packet::{Packet, PacketType, Preamble};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Preamble,
    Length,
    PacketType,
    MessageType,
    Body,
    Checksum,
}

/// Byte-wise packet parser.
#[derive(Debug, Default)]
pub struct Parser {
    state: State,
    packet: Option<Packet>,
}

impl Parser {
    /// Creates a new parser in the initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the parser to the initial state, discarding any partial frame.
    pub fn reset(&mut self) {
        self.state = State::Preamble;
        self.packet = None;
    }

    /// Feeds one byte into the parser.
    ///
    /// Returns `Ok(Some(packet))` when the byte completes a frame,
    /// `Ok(None)` when more bytes are needed, or a [`FrameError`] when the
    /// byte is invalid for the current state. The parser resets itself on
    /// both completion and error.
    pub fn parse(&mut self, byte: u8) -> Result<Option<Packet>, FrameError> {
        let result = self.step(byte);
        if !matches!(result, Ok(None)) {
            self.reset();
        }
        result
    }

    fn step(&mut self, byte: u8) -> Result<Option<Packet>, FrameError> {
        match self.state {
            State::Preamble => match Preamble::from_byte(byte) {
                Some(Preamble::Ack) => Ok(Some(Packet::ack())),
                Some(Preamble::Nak) => Ok(Some(Packet::nak())),
                Some(Preamble::Can) => Ok(Some(Packet::can())),
                Some(Preamble::Sof) => {
                    self.packet = Some(Packet {
                        preamble: Preamble::Sof,
                        length: 0,
                        packet_type: PacketType::Request,
                        message_type: 0,
                        body: Vec::new(),
                        checksum: 0,
                    });
                    self.state = State::Length;
                    Ok(None)
                }
                None => Err(FrameError::BadPreamble(byte)),
            },

            State::Length => {
                if byte < 3 {
                    return Err(FrameError::BadLength(byte));
                }
                self.packet_mut().length = byte;
                self.state = State::PacketType;
                Ok(None)
            }

            State::PacketType => {
                let Some(packet_type) = PacketType::from_byte(byte) else {
                    return Err(FrameError::BadPacketType(byte));
                };
                self.packet_mut().packet_type = packet_type;
                self.state = State::MessageType;
                Ok(None)
            }

            State::MessageType => {
                let packet = self.packet_mut();
                packet.message_type = byte;
                // The message type counts towards the length, so a length of
                // exactly 3 means an empty body.
                self.state = if packet.length == 3 {
                    State::Checksum
                } else {
                    State::Body
                };
                Ok(None)
            }

            State::Body => {
                let packet = self.packet_mut();
                packet.body.push(byte);
                if packet.body.len() == usize::from(packet.length) - 3 {
                    self.state = State::Checksum;
                }
                Ok(None)
            }

            State::Checksum => {
                let packet = self.packet_mut();
                let expected = packet.expected_checksum();
                if expected != byte {
                    return Err(FrameError::ChecksumMismatch {
                        expected,
                        got: byte,
                    });
                }
                packet.checksum = byte;
                Ok(self.packet.take())
            }
        }
    }

    fn packet_mut(&mut self) -> &mut Packet {
        self.packet
            .as_mut()
            .expect("packet is always set past the Preamble state")
    }
}
