//! Wire frame representation for the serial controller protocol.
//!
//! The controller speaks a length-and-checksum framed protocol with four
//! preamble kinds. Three of them are single-byte frames; SOF carries a
//! payload:
//!
//! ```text
//! ┌────────┬─────────┬─────────────┬──────────────┬─────────┬──────────┐
//! │  0x01  │ length  │ packet type │ message type │  body   │ checksum │
//! │  SOF   │ 1 byte  │   1 byte    │    1 byte    │ 0..252  │  1 byte  │
//! └────────┴─────────┴─────────────┴──────────────┴─────────┴──────────┘
//! ```
//!
//! `length` counts everything after itself except the checksum, so
//! `length = 3 + body.len()`. The checksum is `0xFF` XORed with every byte
//! after the preamble and before the checksum itself.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Packet preamble bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Preamble {
    /// Start of frame; a full packet follows.
    Sof = 0x01,
    /// Positive acknowledgement.
    Ack = 0x06,
    /// Negative acknowledgement.
    Nak = 0x15,
    /// Collision / controller busy.
    Can = 0x18,
}

impl Preamble {
    /// Parses a preamble from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Sof),
            0x06 => Some(Self::Ack),
            0x15 => Some(Self::Nak),
            0x18 => Some(Self::Can),
            _ => None,
        }
    }
}

/// SOF packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Host-to-controller (or controller-initiated callback) request.
    Request = 0x00,
    /// Controller response to a request.
    Response = 0x01,
}

impl PacketType {
    /// Parses a packet type from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Maximum body size encodable in the 1-byte length field.
pub const MAX_BODY_LEN: usize = 0xFF - 3;

/// A single protocol frame.
///
/// ACK/NAK/CAN packets carry only their preamble; every other field is
/// meaningful for SOF packets only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub preamble: Preamble,
    pub length: u8,
    pub packet_type: PacketType,
    pub message_type: u8,
    pub body: Vec<u8>,
    pub checksum: u8,
}

impl Packet {
    /// Creates a single-byte ACK packet.
    #[must_use]
    pub fn ack() -> Self {
        Self::single(Preamble::Ack)
    }

    /// Creates a single-byte NAK packet.
    #[must_use]
    pub fn nak() -> Self {
        Self::single(Preamble::Nak)
    }

    /// Creates a single-byte CAN packet.
    #[must_use]
    pub fn can() -> Self {
        Self::single(Preamble::Can)
    }

    fn single(preamble: Preamble) -> Self {
        Self {
            preamble,
            length: 0,
            packet_type: PacketType::Request,
            message_type: 0,
            body: Vec::new(),
            checksum: 0,
        }
    }

    /// Creates a SOF request packet with the length and checksum filled in.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLong`] if the body exceeds
    /// [`MAX_BODY_LEN`].
    pub fn request(message_type: u8, body: Vec<u8>) -> Result<Self, FrameError> {
        Self::sof(PacketType::Request, message_type, body)
    }

    /// Creates a SOF response packet with the length and checksum filled in.
    pub fn response(message_type: u8, body: Vec<u8>) -> Result<Self, FrameError> {
        Self::sof(PacketType::Response, message_type, body)
    }

    fn sof(packet_type: PacketType, message_type: u8, body: Vec<u8>) -> Result<Self, FrameError> {
        let mut packet = Self {
            preamble: Preamble::Sof,
            length: 0,
            packet_type,
            message_type,
            body,
            checksum: 0,
        };
        packet.update()?;
        Ok(packet)
    }

    /// Recomputes the length and checksum from the other fields.
    ///
    /// Single-byte packets have neither, so this is a no-op for them.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLong`] if the body exceeds
    /// [`MAX_BODY_LEN`].
    pub fn update(&mut self) -> Result<(), FrameError> {
        if self.preamble != Preamble::Sof {
            return Ok(());
        }

        if self.body.len() > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLong(self.body.len()));
        }

        // Packet type, message type and checksum account for the minimum of 3.
        self.length = 3 + self.body.len() as u8;
        self.checksum = self.expected_checksum();
        Ok(())
    }

    /// Computes the checksum over the current field values.
    ///
    /// The preamble is not part of the checksum.
    #[must_use]
    pub fn expected_checksum(&self) -> u8 {
        let mut checksum = 0xFFu8;
        checksum ^= self.length;
        checksum ^= self.packet_type as u8;
        checksum ^= self.message_type;
        for b in &self.body {
            checksum ^= b;
        }
        checksum
    }

    /// Serialises the packet, refreshing length and checksum first.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BodyTooLong`] if the body exceeds
    /// [`MAX_BODY_LEN`].
    pub fn to_bytes(&mut self) -> Result<Bytes, FrameError> {
        self.update()?;

        if self.preamble != Preamble::Sof {
            return Ok(Bytes::copy_from_slice(&[self.preamble as u8]));
        }

        let mut buf = BytesMut::with_capacity(5 + self.body.len());
        buf.put_u8(self.preamble as u8);
        buf.put_u8(self.length);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.message_type);
        buf.put_slice(&self.body);
        buf.put_u8(self.checksum);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_packets() {
        let mut ack = Packet::ack();
        assert_eq!(ack.to_bytes().unwrap().as_ref(), &[0x06]);

        let mut nak = Packet::nak();
        assert_eq!(nak.to_bytes().unwrap().as_ref(), &[0x15]);

        let mut can = Packet::can();
        assert_eq!(can.to_bytes().unwrap().as_ref(), &[0x18]);
    }

    #[test]
    fn test_request_no_body() {
        let mut packet = Packet::request(0x02, Vec::new()).unwrap();
        let bytes = packet.to_bytes().unwrap();
        // 0xFF ^ 0x03 ^ 0x00 ^ 0x02 == 0xFE
        assert_eq!(bytes.as_ref(), &[0x01, 0x03, 0x00, 0x02, 0xFE]);
    }

    #[test]
    fn test_request_with_body() {
        let mut packet = Packet::request(0x13, vec![0x05, 0x02, 0x25, 0x01, 0x25]).unwrap();
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 3 + 5);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3], 0x13);
        assert_eq!(&bytes[4..9], &[0x05, 0x02, 0x25, 0x01, 0x25]);
        assert_eq!(bytes[9], packet.expected_checksum());
    }

    #[test]
    fn test_checksum_recomputed_on_serialise() {
        let mut packet = Packet::request(0x15, Vec::new()).unwrap();
        packet.checksum = 0x00;
        packet.length = 0xAA;
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[1], 3);
        assert_eq!(bytes[4], 0xFF ^ 0x03 ^ 0x00 ^ 0x15);
    }

    #[test]
    fn test_body_too_long_refused() {
        assert!(matches!(
            Packet::request(0x13, vec![0; MAX_BODY_LEN + 1]),
            Err(FrameError::BodyTooLong(253))
        ));

        // Exactly at the limit is fine.
        let mut packet = Packet::request(0x13, vec![0; MAX_BODY_LEN]).unwrap();
        assert_eq!(packet.to_bytes().unwrap().len(), 5 + MAX_BODY_LEN);
        assert_eq!(packet.length, 0xFF);
    }

    #[test]
    fn test_preamble_from_byte() {
        assert_eq!(Preamble::from_byte(0x01), Some(Preamble::Sof));
        assert_eq!(Preamble::from_byte(0x06), Some(Preamble::Ack));
        assert_eq!(Preamble::from_byte(0x15), Some(Preamble::Nak));
        assert_eq!(Preamble::from_byte(0x18), Some(Preamble::Can));
        assert_eq!(Preamble::from_byte(0x00), None);
    }
}
