//! Scripted controller simulator.
//!
//! [`SimChannel`] implements [`ByteChannel`] over an in-memory duplex
//! stream and runs a per-session script on the far end, playing the role
//! of the dongle firmware: parsing host frames, ACKing, replying and
//! injecting unsolicited packets.

// Each test binary uses its own slice of these helpers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use zwave::protocol::message::message_type;
use zwave::protocol::{Packet, Parser, Preamble};
use zwave::transport::{ByteChannel, ChannelReader, ChannelWriter};
use zwave::Result;

type Script =
    Arc<dyn Fn(Wire, usize) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// In-memory byte channel driven by a script.
///
/// Every `open` starts a fresh session: a new duplex stream and a new run
/// of the script, which receives the session index (0 for the first open).
pub struct SimChannel {
    script: Script,
    sessions: usize,
    task: Option<JoinHandle<()>>,
}

impl SimChannel {
    pub fn new<F, Fut>(script: F) -> Self
    where
        F: Fn(Wire, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            script: Arc::new(move |wire, session| Box::pin(script(wire, session))),
            sessions: 0,
            task: None,
        }
    }
}

impl ByteChannel for SimChannel {
    fn open(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<(ChannelReader, ChannelWriter)>> + Send + '_>> {
        Box::pin(async move {
            if let Some(task) = self.task.take() {
                task.abort();
            }

            let (near, far) = tokio::io::duplex(65536);
            let session = self.sessions;
            self.sessions += 1;

            let script = Arc::clone(&self.script);
            self.task = Some(tokio::spawn(script(Wire::new(far), session)));

            let (reader, writer) = tokio::io::split(near);
            Ok((
                Box::new(reader) as ChannelReader,
                Box::new(writer) as ChannelWriter,
            ))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            Ok(())
        })
    }
}

/// The simulator's view of the wire: parses host frames and writes
/// controller frames.
pub struct Wire {
    stream: DuplexStream,
    parser: Parser,
    pending: VecDeque<Packet>,
}

impl Wire {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            parser: Parser::new(),
            pending: VecDeque::new(),
        }
    }

    /// Reads the next frame from the host, or `None` on EOF.
    ///
    /// Framing errors (e.g. the `\n` flush byte after every host frame)
    /// are skipped, the way real firmware resynchronises.
    pub async fn read_packet(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Some(packet);
            }

            let mut buf = [0u8; 256];
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            for &byte in &buf[..n] {
                if let Ok(Some(packet)) = self.parser.parse(byte) {
                    self.pending.push_back(packet);
                }
            }
        }
    }

    /// Reads frames until a SOF request with the given message type
    /// arrives, skipping single-byte frames.
    pub async fn expect_request(&mut self, expected: u8) -> Packet {
        loop {
            let packet = self
                .read_packet()
                .await
                .unwrap_or_else(|| panic!("eof waiting for request 0x{expected:02x}"));
            if packet.preamble == Preamble::Sof {
                assert_eq!(
                    packet.message_type, expected,
                    "unexpected request message type"
                );
                return packet;
            }
        }
    }

    /// Reads frames until an ACK arrives, skipping NAK/CAN. A SOF here is
    /// a test failure: the host should be acknowledging, not requesting.
    pub async fn expect_ack(&mut self) {
        loop {
            let packet = self.read_packet().await.expect("eof waiting for ACK");
            match packet.preamble {
                Preamble::Ack => return,
                Preamble::Sof => panic!("got SOF while waiting for ACK"),
                Preamble::Nak | Preamble::Can => {}
            }
        }
    }

    /// Reads frames until a NAK arrives, skipping ACK/CAN.
    pub async fn expect_nak(&mut self) {
        loop {
            let packet = self.read_packet().await.expect("eof waiting for NAK");
            match packet.preamble {
                Preamble::Nak => return,
                Preamble::Sof => panic!("got SOF while waiting for NAK"),
                Preamble::Ack | Preamble::Can => {}
            }
        }
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("sim write");
        self.stream.flush().await.expect("sim flush");
    }

    pub async fn send_packet(&mut self, mut packet: Packet) {
        let bytes = packet.to_bytes().expect("sim packet");
        self.send_bytes(&bytes).await;
    }

    pub async fn send_ack(&mut self) {
        self.send_bytes(&[Preamble::Ack as u8]).await;
    }

    pub async fn send_nak(&mut self) {
        self.send_bytes(&[Preamble::Nak as u8]).await;
    }

    pub async fn send_can(&mut self) {
        self.send_bytes(&[Preamble::Can as u8]).await;
    }

    /// Sends a response-type SOF.
    pub async fn send_response(&mut self, message_type: u8, body: Vec<u8>) {
        self.send_packet(Packet::response(message_type, body).expect("sim response"))
            .await;
    }

    /// Sends a request-type SOF (unsolicited / callback frames).
    pub async fn send_unsolicited(&mut self, message_type: u8, body: Vec<u8>) {
        self.send_packet(Packet::request(message_type, body).expect("sim request"))
            .await;
    }

    /// ACKs a send-data request and plays out its two-stage reply,
    /// returning the callback id the host injected.
    pub async fn complete_send_data(&mut self, request: &Packet, status: u8) -> u8 {
        let callback_id = *request.body.last().expect("send-data body");
        self.send_ack().await;
        self.send_response(message_type::ZW_SEND_DATA, vec![0x01]).await;
        self.send_unsolicited(
            message_type::ZW_SEND_DATA,
            vec![callback_id, status, 0x00, 0x00],
        )
        .await;
        callback_id
    }

    /// Keeps reading (and discarding) host frames until the host hangs up,
    /// so host-side writes never block on a full buffer.
    pub async fn drain(mut self) {
        while self.read_packet().await.is_some() {}
    }
}

/// Builds a capabilities response body advertising the given message
/// types.
pub fn capabilities_body(message_types: &[u8]) -> Vec<u8> {
    let mut body = vec![0x05, 0x07, 0x00, 0x86, 0x00, 0x01, 0x00, 0x5A];
    let mut mask = [0u8; 32];
    for &t in message_types {
        mask[usize::from(t - 1) / 8] |= 1 << ((t - 1) % 8);
    }
    body.extend_from_slice(&mask);
    body
}

/// Builds an init-data response body with the given node-id bitmap bits
/// set.
pub fn init_data_body(nodes: &[u8]) -> Vec<u8> {
    let mut body = vec![0x15, 0x23, 0x1D];
    let mut bitmap = [0u8; 29];
    for &node in nodes {
        bitmap[usize::from(node - 1) / 8] |= 1 << ((node - 1) % 8);
    }
    body.extend_from_slice(&bitmap);
    body.extend_from_slice(&[0x05, 0x00]);
    body
}

/// Plays the four-request initialization handshake.
pub async fn serve_initialize(wire: &mut Wire, message_types: &[u8], nodes: &[u8]) {
    wire.expect_request(message_type::SERIAL_API_GET_CAPABILITIES)
        .await;
    wire.send_ack().await;
    wire.send_response(
        message_type::SERIAL_API_GET_CAPABILITIES,
        capabilities_body(message_types),
    )
    .await;

    wire.expect_request(message_type::GET_VERSION).await;
    wire.send_ack().await;
    let mut version = b"Z-Wave 2.78".to_vec();
    version.extend_from_slice(&[0x00, 0x01]);
    wire.send_response(message_type::GET_VERSION, version).await;

    wire.expect_request(message_type::MEMORY_GET_ID).await;
    wire.send_ack().await;
    wire.send_response(
        message_type::MEMORY_GET_ID,
        vec![0xC0, 0x01, 0x23, 0x45, 0x01],
    )
    .await;

    wire.expect_request(message_type::SERIAL_API_GET_INIT_DATA)
        .await;
    wire.send_ack().await;
    wire.send_response(message_type::SERIAL_API_GET_INIT_DATA, init_data_body(nodes))
        .await;
}
