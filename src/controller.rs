//! Serial controller transport.
//!
//! Owns the byte channel and implements the request/ACK/response protocol
//! over it. Two workers cooperate:
//!
//! - the **reader** owns the read half and the incremental parser, and
//!   forwards every parsed packet over an internal channel (a framing
//!   error is forwarded as a `None` sentinel so the dispatcher can NAK in
//!   order with everything else it writes);
//! - the **dispatcher** owns the write half and multiplexes incoming
//!   packets, outgoing requests and the stop signal. All writes to the
//!   wire happen on this one task; anything else would interleave frames.
//!
//! Callers interact through [`SerialController::do_request`], which blocks
//! until the dispatcher completes the request, the budgets run out, or the
//! controller is closed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::message::message_type;
use crate::protocol::packet::{Packet, PacketType, Preamble};
use crate::protocol::parser::Parser;
use crate::transport::{ByteChannel, ChannelReader, ChannelWriter};

/// Maximum attempts to get a request ACKed.
pub const MAX_REQUEST_RETRY: u32 = 5;

/// Maximum attempts to receive a matching response.
pub const MAX_RESPONSE_RETRY: u32 = 5;

/// Per-attempt budget for the ACK handshake.
pub const REQUEST_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt budget for response correlation.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for the reader worker; bounds shutdown latency.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Inclusive range for injected send-data callback ids. Low ids are left
/// to the controller firmware's own use.
const CALLBACK_ID_MIN: u8 = 0x0B;
const CALLBACK_ID_MAX: u8 = 0x7F;

/// ACK frame with the trailing newline that flushes USB CDC buffering.
const ACK_BYTES: &[u8] = &[Preamble::Ack as u8, b'\n'];
const NAK_BYTES: &[u8] = &[Preamble::Nak as u8];

/// Something that can run a blocking request/response exchange.
///
/// Implemented by the network layer (which adds the supported-message-type
/// gate) so nodes stay decoupled from the concrete channel type.
pub trait RequestProcessor: Send + Sync {
    /// Issues a request and awaits its response.
    fn do_request<'a>(
        &'a self,
        packet: Packet,
    ) -> Pin<Box<dyn Future<Output = Result<Packet>> + Send + 'a>>;
}

/// An in-flight request travelling from a caller to the dispatcher.
struct PendingRequest {
    packet: Packet,
    done: oneshot::Sender<Result<Packet>>,
}

struct Shared {
    /// Sender half of the request queue; `None` while closed.
    requests: StdMutex<Option<mpsc::Sender<PendingRequest>>>,
    /// Where unsolicited packets are forwarded.
    callback_sink: StdMutex<Option<mpsc::Sender<Packet>>>,
}

struct Workers {
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Request/response transport over a byte channel.
///
/// All methods are safe to call from any task. The same controller can be
/// opened and closed repeatedly; closing invalidates all in-flight and
/// queued requests with [`Error::Closed`].
pub struct SerialController<C> {
    channel: Mutex<C>,
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl<C: ByteChannel> SerialController<C> {
    /// Creates a controller over the given channel (not yet opened).
    pub fn new(channel: C) -> Self {
        Self {
            channel: Mutex::new(channel),
            shared: Arc::new(Shared {
                requests: StdMutex::new(None),
                callback_sink: StdMutex::new(None),
            }),
            workers: Mutex::new(None),
        }
    }

    /// Returns true if the controller is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.requests.lock().expect("requests lock").is_some()
    }

    /// Registers the sink unsolicited packets are forwarded to.
    ///
    /// Deliveries are fire-and-forget from spawned tasks; the sink may be
    /// replaced at any time.
    pub fn set_callback_sink(&self, sink: mpsc::Sender<Packet>) {
        *self.shared.callback_sink.lock().expect("sink lock") = Some(sink);
    }

    /// Opens the channel and starts the workers. Idempotent.
    pub async fn open(&self) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return Ok(());
        }

        let (reader, writer) = self.channel.lock().await.open().await?;

        let (responses_tx, responses_rx) = mpsc::channel(64);
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);

        let reader_handle = tokio::spawn(reader_worker(reader, responses_tx, stop_rx.clone()));

        let dispatcher = Dispatcher {
            writer,
            responses: responses_rx,
            requests: requests_rx,
            stop: stop_rx,
            shared: Arc::clone(&self.shared),
            // Seed randomly so a restarted session does not reuse the
            // previous session's callback ids.
            callback_id: rand::thread_rng().gen_range(CALLBACK_ID_MIN..=CALLBACK_ID_MAX),
        };
        let dispatcher_handle = tokio::spawn(dispatcher.run());

        *self.shared.requests.lock().expect("requests lock") = Some(requests_tx);
        *workers = Some(Workers {
            stop: stop_tx,
            reader: reader_handle,
            dispatcher: dispatcher_handle,
        });

        Ok(())
    }

    /// Stops the workers, fails all pending requests with
    /// [`Error::Closed`] and closes the channel. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut workers = self.workers.lock().await;
        let Some(workers) = workers.take() else {
            return Ok(());
        };

        // Refuse new requests first, then stop the workers; the dispatcher
        // drains whatever is already queued.
        *self.shared.requests.lock().expect("requests lock") = None;
        let _ = workers.stop.send(true);
        let _ = workers.dispatcher.await;
        let _ = workers.reader.await;

        self.channel.lock().await.close().await
    }

    /// Issues a request and awaits its response.
    ///
    /// Blocks the calling task until the dispatcher completes the request.
    /// Safe to call concurrently; the dispatcher serialises requests onto
    /// the wire.
    pub async fn do_request(&self, packet: Packet) -> Result<Packet> {
        if packet.preamble != Preamble::Sof {
            return Err(Error::protocol(format!(
                "request has non-SOF preamble: 0x{:02x}",
                packet.preamble as u8
            )));
        }
        if packet.packet_type != PacketType::Request {
            return Err(Error::protocol("request has response packet type"));
        }

        let Some(requests) = self
            .shared
            .requests
            .lock()
            .expect("requests lock")
            .clone()
        else {
            return Err(Error::Closed);
        };

        let (done_tx, done_rx) = oneshot::channel();
        requests
            .send(PendingRequest {
                packet,
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;

        done_rx.await.map_err(|_| Error::Closed)?
    }
}

/// Reads the channel, feeds the parser and forwards packets in order.
async fn reader_worker(
    mut reader: ChannelReader,
    responses: mpsc::Sender<Option<Packet>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut parser = Parser::new();
    let mut buf = [0u8; 512];

    loop {
        let read = tokio::select! {
            biased;
            _ = stop.changed() => {
                tracing::debug!("reader stopping");
                return;
            }
            read = tokio::time::timeout(SERIAL_READ_TIMEOUT, reader.read(&mut buf)) => read,
        };

        let n = match read {
            Err(_) => continue, // read timeout, loop to re-check stop
            Ok(Ok(0)) => {
                tracing::debug!("byte channel closed");
                return;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!("read error: {e}");
                return;
            }
        };

        tracing::trace!("received {}", hex::encode(&buf[..n]));
        for &byte in &buf[..n] {
            let forward = match parser.parse(byte) {
                Ok(Some(packet)) => Some(packet),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("framing error: {e}");
                    None
                }
            };
            // None asks the dispatcher to NAK; forwarding it on the same
            // channel keeps the NAK ordered with everything else.
            if responses.send(forward).await.is_err() {
                tracing::debug!("response receiver dropped");
                return;
            }
        }
    }
}

/// Outcome of handling one request on the dispatcher.
enum Flow {
    Continue,
    Stopped,
}

struct Dispatcher {
    writer: ChannelWriter,
    responses: mpsc::Receiver<Option<Packet>>,
    requests: mpsc::Receiver<PendingRequest>,
    stop: watch::Receiver<bool>,
    shared: Arc<Shared>,
    callback_id: u8,
}

impl Dispatcher {
    async fn run(mut self) {
        // A lone NAK resynchronises any half-parsed state in the dongle.
        if let Err(e) = self.write_wire(NAK_BYTES).await {
            tracing::error!("startup NAK failed: {e}");
        }

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                response = self.responses.recv() => match response {
                    Some(response) => self.handle_unsolicited(response).await,
                    None => break,
                },
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Flow::Stopped = self.handle_request(request).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.drain().await;
    }

    /// Fails queued requests and drops buffered responses on the way out.
    async fn drain(&mut self) {
        self.requests.close();
        while let Some(request) = self.requests.recv().await {
            tracing::info!("dropping queued request on close: 0x{:02x}", request.packet.message_type);
            let _ = request.done.send(Err(Error::Closed));
        }

        self.responses.close();
        while let Some(response) = self.responses.recv().await {
            if let Some(packet) = response {
                tracing::info!("dropping response on close: 0x{:02x}", packet.message_type);
            }
        }
    }

    async fn write_wire(&mut self, bytes: &[u8]) -> Result<()> {
        tracing::trace!("sending {}", hex::encode(bytes));
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Handles a packet that arrived with no active request.
    async fn handle_unsolicited(&mut self, response: Option<Packet>) {
        let Some(packet) = response else {
            // Reader hit a framing error; ask the dongle to retransmit.
            if let Err(e) = self.write_wire(NAK_BYTES).await {
                tracing::error!("NAK write failed: {e}");
            }
            return;
        };

        match packet.preamble {
            Preamble::Sof => {
                if let Err(e) = self.write_wire(ACK_BYTES).await {
                    tracing::error!("ACK write failed: {e}");
                }
                self.forward_to_sink(packet);
            }
            Preamble::Ack | Preamble::Nak | Preamble::Can => {
                tracing::warn!("unexpected idle preamble: 0x{:02x}", packet.preamble as u8);
            }
        }
    }

    /// Forwards an unsolicited packet to the registered sink,
    /// fire-and-forget so a slow consumer never stalls the dispatcher.
    fn forward_to_sink(&self, packet: Packet) {
        let sink = self.shared.callback_sink.lock().expect("sink lock").clone();
        if let Some(sink) = sink {
            tokio::spawn(async move {
                if sink.send(packet).await.is_err() {
                    tracing::debug!("callback sink dropped");
                }
            });
        } else {
            tracing::debug!("no callback sink, dropping 0x{:02x}", packet.message_type);
        }
    }

    fn next_callback_id(&mut self) -> u8 {
        advance_callback_id(&mut self.callback_id)
    }

    /// Runs one request through the ACK handshake and response
    /// correlation phases.
    async fn handle_request(&mut self, request: PendingRequest) -> Flow {
        let PendingRequest { mut packet, done } = request;

        // Send-data requests are correlated by callback id; inject one here
        // so concurrent callers can never collide.
        let mut callback_id = None;
        if packet.message_type == message_type::ZW_SEND_DATA {
            let id = self.next_callback_id();
            if let Err(e) = inject_callback_id(&mut packet, id) {
                let _ = done.send(Err(e));
                return Flow::Continue;
            }
            callback_id = Some(id);
        }

        let request_bytes = match packet.to_bytes() {
            Ok(bytes) => {
                let mut bytes = bytes.to_vec();
                bytes.push(b'\n');
                bytes
            }
            Err(e) => {
                let _ = done.send(Err(e.into()));
                return Flow::Continue;
            }
        };

        // Phase A: write the request until the dongle ACKs it.
        let mut attempts = 0u32;
        let mut acked = false;
        let mut retransmit = true;
        while attempts < MAX_REQUEST_RETRY && !acked {
            if retransmit {
                if let Err(e) = self.write_wire(&request_bytes).await {
                    let _ = done.send(Err(e));
                    return Flow::Continue;
                }
                retransmit = false;
            }

            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    tracing::info!("dropping request on close: 0x{:02x}", packet.message_type);
                    let _ = done.send(Err(Error::Closed));
                    return Flow::Stopped;
                }
                response = self.responses.recv() => match response {
                    None => {
                        let _ = done.send(Err(Error::Closed));
                        return Flow::Stopped;
                    }
                    Some(None) => {
                        if let Err(e) = self.write_wire(NAK_BYTES).await {
                            tracing::error!("NAK write failed: {e}");
                        }
                        attempts += 1;
                        retransmit = true;
                    }
                    Some(Some(response)) => match response.preamble {
                        Preamble::Sof => {
                            // Unsolicited packet mid-handshake; ACK and
                            // route it without touching the retry budget.
                            if let Err(e) = self.write_wire(ACK_BYTES).await {
                                tracing::error!("ACK write failed: {e}");
                            }
                            self.forward_to_sink(response);
                        }
                        Preamble::Ack => acked = true,
                        Preamble::Nak => {
                            tracing::warn!("got NAK waiting for ACK");
                            attempts += 1;
                            retransmit = true;
                        }
                        Preamble::Can => {
                            // Mesh collision while sending; frequent on a
                            // busy network and not fatal.
                            tracing::warn!("got CAN waiting for ACK");
                            attempts += 1;
                            retransmit = true;
                        }
                    },
                },
                () = tokio::time::sleep(REQUEST_ACK_TIMEOUT) => {
                    tracing::warn!("timed out waiting for ACK");
                    attempts += 1;
                    retransmit = true;
                }
            }
        }

        if !acked {
            tracing::error!("request failed after {MAX_REQUEST_RETRY} attempts");
            let _ = done.send(Err(Error::SendFailed {
                attempts: MAX_REQUEST_RETRY,
            }));
            return Flow::Continue;
        }

        self.await_response(&packet, callback_id, done).await
    }

    /// Phase B: wait for the response that matches the request.
    ///
    /// Send-data requests complete in two stages: a 1-byte acceptance
    /// response, then the transmit callback whose first body byte must
    /// match the injected callback id.
    async fn await_response(
        &mut self,
        packet: &Packet,
        callback_id: Option<u8>,
        done: oneshot::Sender<Result<Packet>>,
    ) -> Flow {
        let mut attempts = 0u32;
        let mut awaiting_callback = false;

        while attempts < MAX_RESPONSE_RETRY {
            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    tracing::info!("dropping request on close: 0x{:02x}", packet.message_type);
                    let _ = done.send(Err(Error::Closed));
                    return Flow::Stopped;
                }
                response = self.responses.recv() => match response {
                    None => {
                        let _ = done.send(Err(Error::Closed));
                        return Flow::Stopped;
                    }
                    Some(None) => {
                        if let Err(e) = self.write_wire(NAK_BYTES).await {
                            tracing::error!("NAK write failed: {e}");
                        }
                        attempts += 1;
                    }
                    Some(Some(response)) => match response.preamble {
                        Preamble::Sof => {
                            if let Err(e) = self.write_wire(ACK_BYTES).await {
                                tracing::error!("ACK write failed: {e}");
                            }

                            if response.message_type != packet.message_type {
                                // Someone else's report; route it so the
                                // waiter it belongs to still sees it. Costs
                                // no budget: only silence and wire noise do.
                                tracing::debug!(
                                    "expected message type 0x{:02x}, routing 0x{:02x}",
                                    packet.message_type,
                                    response.message_type
                                );
                                self.forward_to_sink(response);
                                continue;
                            }

                            let Some(callback_id) = callback_id else {
                                let _ = done.send(Ok(response));
                                return Flow::Continue;
                            };

                            if !awaiting_callback {
                                // Stage one: the controller accepted the
                                // frame for transmission.
                                if response.body.len() == 1 && response.body[0] == 0x01 {
                                    awaiting_callback = true;
                                    attempts = 0;
                                } else if response.body.len() == 1 {
                                    let _ = done.send(Err(Error::TransmitFailed {
                                        status: response.body[0],
                                    }));
                                    return Flow::Continue;
                                } else {
                                    // A stray callback frame, likely from a
                                    // request that timed out earlier.
                                    self.forward_to_sink(response);
                                }
                                continue;
                            }

                            // Stage two: the transmit callback.
                            if response.body.len() == 4 && response.body[0] == callback_id {
                                let _ = done.send(Ok(response));
                                return Flow::Continue;
                            }
                            tracing::debug!(
                                "callback id mismatch: expected 0x{callback_id:02x}, routing"
                            );
                            self.forward_to_sink(response);
                        }
                        Preamble::Ack | Preamble::Nak | Preamble::Can => {
                            tracing::warn!(
                                "unexpected preamble waiting for response: 0x{:02x}",
                                response.preamble as u8
                            );
                            attempts += 1;
                        }
                    },
                },
                () = tokio::time::sleep(RESPONSE_TIMEOUT) => {
                    tracing::warn!("timed out waiting for response");
                    attempts += 1;
                }
            }
        }

        tracing::error!("no matching response after {MAX_RESPONSE_RETRY} attempts");
        let _ = done.send(Err(Error::ResponseFailed {
            attempts: MAX_RESPONSE_RETRY,
        }));
        Flow::Continue
    }
}

/// Returns the current callback id and advances the counter, wrapping
/// within `[CALLBACK_ID_MIN, CALLBACK_ID_MAX]`.
fn advance_callback_id(counter: &mut u8) -> u8 {
    let id = *counter;
    *counter = if *counter >= CALLBACK_ID_MAX {
        CALLBACK_ID_MIN
    } else {
        *counter + 1
    };
    id
}

/// Appends a callback id to a send-data request body.
///
/// Refuses bodies that are malformed or already carry a caller-supplied
/// callback id; correlation only works if the transport owns the id space.
fn inject_callback_id(packet: &mut Packet, callback_id: u8) -> Result<()> {
    let body = &packet.body;
    if body.len() < 4 {
        return Err(Error::protocol(format!(
            "send-data body too short: {}",
            body.len()
        )));
    }

    // | node_id | payload_len + 1 | command_class | payload... | options |
    let expected = usize::from(body[1]) + 3;
    if body.len() == expected + 1 {
        return Err(Error::protocol(
            "send-data request already carries a callback id",
        ));
    }
    if body.len() != expected {
        return Err(Error::protocol(format!(
            "bad send-data body length: {} != {expected}",
            body.len()
        )));
    }

    packet.body.push(callback_id);
    packet.update()?;
    Ok(())
}
