//! Network of Z-Wave nodes behind a serial controller.
//!
//! The [`Network`] owns the controller, the node table and the router task
//! that decodes unsolicited packets and fans them out to nodes. All public
//! methods are safe to call from any task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::controller::{RequestProcessor, SerialController};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::message::{
    self, message_type, update_status, SerialApiCapabilities, SerialApiInitData,
};
use crate::protocol::packet::Packet;
use crate::transport::{ByteChannel, SerialChannel, SerialConfig};

/// Routes requests through the controller, gated on the message types the
/// controller declared support for. Nodes hold this behind
/// [`RequestProcessor`] so they stay independent of the channel type.
struct Gateway<C> {
    controller: SerialController<C>,
    /// `None` until `initialize` has fetched the capabilities.
    supported_message_types: StdRwLock<Option<Vec<u8>>>,
}

impl<C: ByteChannel> Gateway<C> {
    fn check_supported(&self, message_type: u8) -> Result<()> {
        let supported = self
            .supported_message_types
            .read()
            .expect("supported lock");
        // Before initialization the list is unknown; let everything pass.
        match supported.as_deref() {
            Some(types) if !types.contains(&message_type) => {
                Err(Error::UnsupportedMessageType { message_type })
            }
            _ => Ok(()),
        }
    }
}

impl<C: ByteChannel> RequestProcessor for Gateway<C> {
    fn do_request<'a>(
        &'a self,
        packet: Packet,
    ) -> Pin<Box<dyn Future<Output = Result<Packet>> + Send + 'a>> {
        Box::pin(async move {
            self.check_supported(packet.message_type)?;
            self.controller.do_request(packet).await
        })
    }
}

struct Router {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A Z-Wave network driven through a USB serial controller.
pub struct Network<C = SerialChannel> {
    gateway: Arc<Gateway<C>>,
    nodes: Arc<RwLock<HashMap<u8, Arc<Node>>>>,
    router: Mutex<Option<Router>>,
    debug_logging: bool,
}

impl Network<SerialChannel> {
    /// Creates a network for the serial controller at `device_path`
    /// (not yet opened).
    #[must_use]
    pub fn serial(device_path: impl Into<String>) -> Self {
        Self::new(SerialChannel::new(SerialConfig::new(device_path)))
    }
}

impl<C: ByteChannel> Network<C> {
    /// Creates a network over the given byte channel (not yet opened).
    pub fn new(channel: C) -> Self {
        Self {
            gateway: Arc::new(Gateway {
                controller: SerialController::new(channel),
                supported_message_types: StdRwLock::new(None),
            }),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            router: Mutex::new(None),
            debug_logging: false,
        }
    }

    /// Enables verbose logging of routed packets.
    #[must_use]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Opens the controller and starts the callback router. Idempotent.
    pub async fn open(&self) -> Result<()> {
        let mut router = self.router.lock().await;
        if router.is_some() {
            return Ok(());
        }

        self.gateway.controller.open().await?;

        let (callback_tx, callback_rx) = mpsc::channel(16);
        self.gateway.controller.set_callback_sink(callback_tx);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(route_callbacks(
            callback_rx,
            Arc::clone(&self.nodes),
            stop_rx,
            self.debug_logging,
        ));

        *router = Some(Router {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Closes the controller and stops the router. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut router = self.router.lock().await;
        let Some(router) = router.take() else {
            return Ok(());
        };

        let result = self.gateway.controller.close().await;

        let _ = router.stop.send(true);
        let _ = router.handle.await;

        result
    }

    /// Queries the controller and populates the node table.
    ///
    /// Runs four control requests in order: capabilities (filling the
    /// supported-message-type gate), version, memory id (the controller
    /// must sit at node id 1) and init data (the bitmap of known nodes).
    pub async fn initialize(&self) -> Result<()> {
        // Hold the router slot as the network write lock so concurrent
        // initializations serialise.
        let _router = self.router.lock().await;

        let capabilities = self.initial_capabilities().await?;
        self.gateway
            .supported_message_types
            .write()
            .expect("supported lock")
            .replace(capabilities.message_types.clone());

        let version = self.initial_version().await?;

        let memory_id = self.initial_memory_id().await?;
        if memory_id.node_id != 0x01 {
            return Err(Error::protocol(format!(
                "expected controller at node 0x01, not 0x{:02x}",
                memory_id.node_id
            )));
        }

        let init_data = self.initial_init_data().await?;

        if self.debug_logging {
            tracing::debug!("GetVersion: {version:?}");
            tracing::debug!("MemoryGetID: {memory_id:?}");
            tracing::debug!("SerialAPIGetCapabilities: {capabilities:?}");
            tracing::debug!("SerialAPIGetInitData: {init_data:?}");
        }

        let mut nodes = self.nodes.write().await;
        for id in init_data.nodes {
            if id == memory_id.node_id {
                continue;
            }
            nodes.entry(id).or_insert_with(|| {
                Arc::new(Node::new(
                    id,
                    Arc::clone(&self.gateway) as Arc<dyn RequestProcessor>,
                ))
            });
        }
        // Nodes that fell out of the bitmap are kept; dead-node pruning
        // needs a reachability probe first.

        Ok(())
    }

    async fn initial_capabilities(&self) -> Result<SerialApiCapabilities> {
        let response = self
            .gateway
            .controller
            .do_request(message::serial_api_get_capabilities_request())
            .await?;
        message::serial_api_get_capabilities_response(&response)
    }

    async fn initial_version(&self) -> Result<message::GetVersion> {
        let response = self
            .gateway
            .controller
            .do_request(message::get_version_request())
            .await?;
        message::get_version_response(&response)
    }

    async fn initial_memory_id(&self) -> Result<message::MemoryGetId> {
        let response = self
            .gateway
            .controller
            .do_request(message::memory_get_id_request())
            .await?;
        message::memory_get_id_response(&response)
    }

    async fn initial_init_data(&self) -> Result<SerialApiInitData> {
        let response = self
            .gateway
            .controller
            .do_request(message::serial_api_get_init_data_request())
            .await?;
        message::serial_api_get_init_data_response(&response)
    }

    /// Issues a raw request, gated on the controller's supported message
    /// types once `initialize` has populated them.
    pub async fn do_request(&self, packet: Packet) -> Result<Packet> {
        RequestProcessor::do_request(self.gateway.as_ref(), packet).await
    }

    /// Returns the node with the given id, if known.
    pub async fn get_node(&self, node_id: u8) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&node_id).cloned()
    }

    /// Returns all known nodes.
    pub async fn get_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }
}

/// Router task: decodes unsolicited packets from the controller sink and
/// hands them to the owning node.
async fn route_callbacks(
    mut callbacks: mpsc::Receiver<Packet>,
    nodes: Arc<RwLock<HashMap<u8, Arc<Node>>>>,
    mut stop: watch::Receiver<bool>,
    debug_logging: bool,
) {
    loop {
        let packet = tokio::select! {
            biased;
            _ = stop.changed() => break,
            packet = callbacks.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        if debug_logging {
            tracing::debug!(
                "router received 0x{:02x}: {}",
                packet.message_type,
                hex::encode(&packet.body)
            );
        }

        match packet.message_type {
            message_type::APPLICATION_COMMAND => {
                match message::application_command_response(&packet) {
                    Ok(command) => {
                        if let Some(node) = nodes.read().await.get(&command.node_id).cloned() {
                            // Deliveries run on their own task so a slow
                            // subscriber can never stall the router.
                            tokio::spawn(async move {
                                node.on_application_command(command).await;
                            });
                        } else {
                            tracing::info!(
                                "application command for unknown node {}",
                                command.node_id
                            );
                        }
                    }
                    Err(e) => tracing::error!("bad application command: {e}"),
                }
            }

            message_type::ZW_APPLICATION_UPDATE => {
                match message::application_update_response(&packet) {
                    Ok(update) => {
                        if update.status != update_status::NODE_INFO_RECEIVED {
                            tracing::info!(
                                "application update with status 0x{:02x} for node {}",
                                update.status,
                                update.node_id
                            );
                        } else if let Some(node) =
                            nodes.read().await.get(&update.node_id).cloned()
                        {
                            tokio::spawn(async move {
                                node.on_application_update(update).await;
                            });
                        } else {
                            tracing::info!(
                                "application update for unknown node {}",
                                update.node_id
                            );
                        }
                    }
                    Err(e) => tracing::error!("bad application update: {e}"),
                }
            }

            other => {
                tracing::info!("unhandled callback message type 0x{other:02x}");
            }
        }
    }

    // Drop whatever is still queued; the controller is going away.
    callbacks.close();
    while let Some(packet) = callbacks.recv().await {
        tracing::info!("dropping callback on close: 0x{:02x}", packet.message_type);
    }
}
