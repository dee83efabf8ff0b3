//! A node on the Z-Wave mesh.
//!
//! Nodes are created by [`Network::initialize`](crate::Network::initialize)
//! from the controller's node bitmap. Each node owns its mutable state
//! behind an async lock, a keyed-callback registry that steers inbound
//! reports to waiters, and broadcast subscriber sets for observers.
//!
//! Command-class functionality is exposed through façade accessors
//! (e.g. [`Node::binary_switch`]) that return `Some` only when the node
//! advertised the class in its node-info frame.

pub mod cache;
pub mod classes;

mod alarm;
mod association;
mod basic;
mod battery;
mod binary_sensor;
mod binary_switch;
mod clock;
mod configuration;
mod manufacturer_specific;
mod meter;
mod multilevel_sensor;
mod multilevel_switch;
mod naming;
mod version;

pub use alarm::{alarm_type, Alarm};
pub use association::Association;
pub use basic::Basic;
pub use battery::Battery;
pub use binary_sensor::{binary_sensor_type, BinarySensor};
pub use binary_switch::BinarySwitch;
pub use clock::Clock;
pub use configuration::Configuration;
pub use manufacturer_specific::ManufacturerSpecific;
pub use meter::{meter_scale, meter_type, rate_type, Meter, MeterResult};
pub use multilevel_sensor::{sensor_type, MultiLevelSensor, MultiLevelSensorResult};
pub use multilevel_switch::MultiLevelSwitch;
pub use naming::NamingAndLocation;
pub use version::Version;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::controller::RequestProcessor;
use crate::error::{Error, Result};
use crate::node::cache::NodeCache;
use crate::node::classes::command_class;
use crate::protocol::message::{
    self, transmit_complete, update_status, ApplicationCommand, ApplicationUpdate,
    DEFAULT_TRANSMIT_OPTIONS,
};

/// Total budget for awaiting a matching report.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for the node-info frame to arrive during `load`.
const NODE_INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// A decoded node-originated command report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCommandData {
    pub status: u8,
    /// Source node id.
    pub node_id: u8,
    pub command: CommandData,
}

/// The class/command/data triple inside a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandData {
    pub class_id: u8,
    pub command_id: u8,
    pub data: Vec<u8>,
}

/// Predicate deciding whether a delivered report is the one a waiter is
/// looking for.
pub type ReportFilter<'a> = &'a (dyn Fn(&ApplicationCommandData) -> bool + Send + Sync);

/// Handle identifying a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberToken(u64);

/// Basic/generic/specific device class triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceClass {
    pub basic: u8,
    pub generic: u8,
    pub specific: u8,
}

struct Subscriber<T> {
    token: SubscriberToken,
    sink: mpsc::Sender<T>,
}

/// Clones the value to every subscriber on its own task, so a slow
/// consumer can never stall the delivering dispatcher.
fn deliver<T: Clone + Send + 'static>(subscribers: &[Subscriber<T>], value: &T) {
    for subscriber in subscribers {
        let sink = subscriber.sink.clone();
        let value = value.clone();
        tokio::spawn(async move {
            if sink.send(value).await.is_err() {
                tracing::trace!("subscriber sink dropped");
            }
        });
    }
}

/// Lookup key for the keyed-callback registry.
fn callback_key(class_id: u8, command_id: u8) -> u16 {
    (u16::from(class_id) << 8) | u16::from(command_id)
}

/// Splits a node-info class list at the class mark into the classes the
/// node supports and the classes it can control.
fn split_class_list(classes: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut supports = Vec::new();
    let mut controls = Vec::new();
    let mut after_mark = false;
    for &class in classes {
        if !after_mark && class == command_class::MARK {
            after_mark = true;
        } else if after_mark {
            controls.push(class);
        } else {
            supports.push(class);
        }
    }
    (supports, controls)
}

#[derive(Default)]
struct NodeState {
    listening: bool,
    device_class: DeviceClass,
    command_classes: Vec<u8>,
    control_command_classes: Vec<u8>,
    manufacturer_id: u16,
    product_type: u16,
    product_id: u16,

    next_token: u64,
    keyed_callbacks: HashMap<u16, Vec<Subscriber<ApplicationCommandData>>>,
    command_subscribers: Vec<Subscriber<ApplicationCommandData>>,
    update_subscribers: Vec<Subscriber<ApplicationUpdate>>,
}

impl NodeState {
    fn supports(&self, class_id: u8) -> bool {
        self.command_classes.contains(&class_id)
    }

    fn take_token(&mut self) -> SubscriberToken {
        let token = SubscriberToken(self.next_token);
        self.next_token += 1;
        token
    }

    fn register_keyed(
        &mut self,
        key: u16,
    ) -> (SubscriberToken, mpsc::Receiver<ApplicationCommandData>) {
        let token = self.take_token();
        let (sink, receiver) = mpsc::channel(1);
        self.keyed_callbacks
            .entry(key)
            .or_default()
            .push(Subscriber { token, sink });
        (token, receiver)
    }

    fn remove_keyed(&mut self, key: u16, token: SubscriberToken) {
        if let Some(subscribers) = self.keyed_callbacks.get_mut(&key) {
            subscribers.retain(|s| s.token != token);
            if subscribers.is_empty() {
                self.keyed_callbacks.remove(&key);
            }
        }
    }
}

/// A logical endpoint on the mesh.
pub struct Node {
    id: u8,
    api: Arc<dyn RequestProcessor>,
    state: RwLock<NodeState>,
}

impl Node {
    /// Creates a node backed by the given request processor.
    pub(crate) fn new(id: u8, api: Arc<dyn RequestProcessor>) -> Self {
        Self {
            id,
            api,
            state: RwLock::new(NodeState::default()),
        }
    }

    /// The node id, in [1, 232].
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Whether the node's radio is always listening.
    pub async fn is_listening(&self) -> bool {
        self.state.read().await.listening
    }

    /// The node's device class triple.
    pub async fn device_class(&self) -> DeviceClass {
        self.state.read().await.device_class
    }

    /// Command classes the node supports.
    pub async fn command_classes(&self) -> Vec<u8> {
        self.state.read().await.command_classes.clone()
    }

    /// Command classes the node can control in other nodes.
    pub async fn control_command_classes(&self) -> Vec<u8> {
        self.state.read().await.control_command_classes.clone()
    }

    /// Manufacturer, product type and product ids, if known.
    pub async fn product_info(&self) -> (u16, u16, u16) {
        let state = self.state.read().await;
        (state.manufacturer_id, state.product_type, state.product_id)
    }

    /// Whether the node advertised support for a command class.
    pub async fn supports_command_class(&self, class_id: u8) -> bool {
        self.state.read().await.supports(class_id)
    }

    // ==================== Subscriptions ====================

    /// Subscribes a sink to every inbound command report from this node.
    pub async fn add_application_command_subscriber(
        &self,
        sink: mpsc::Sender<ApplicationCommandData>,
    ) -> SubscriberToken {
        let mut state = self.state.write().await;
        let token = state.take_token();
        state.command_subscribers.push(Subscriber { token, sink });
        token
    }

    /// Removes a command-report subscriber.
    pub async fn remove_application_command_subscriber(&self, token: SubscriberToken) {
        let mut state = self.state.write().await;
        state.command_subscribers.retain(|s| s.token != token);
    }

    /// Subscribes a sink to every inbound application update from this node.
    pub async fn add_application_update_subscriber(
        &self,
        sink: mpsc::Sender<ApplicationUpdate>,
    ) -> SubscriberToken {
        let mut state = self.state.write().await;
        let token = state.take_token();
        state.update_subscribers.push(Subscriber { token, sink });
        token
    }

    /// Removes an application-update subscriber.
    pub async fn remove_application_update_subscriber(&self, token: SubscriberToken) {
        let mut state = self.state.write().await;
        state.update_subscribers.retain(|s| s.token != token);
    }

    // ==================== Inbound dispatch ====================

    /// Routes a decoded command report to keyed waiters and broadcast
    /// subscribers, each delivery carrying its own copy.
    pub(crate) async fn on_application_command(&self, command: ApplicationCommand) {
        if command.body.len() < 2 {
            tracing::warn!(
                "command report from node {} too short: {}",
                command.node_id,
                command.body.len()
            );
            return;
        }

        let class_id = command.body[0];
        let command_id = command.body[1];
        let data = ApplicationCommandData {
            status: command.status,
            node_id: command.node_id,
            command: CommandData {
                class_id,
                command_id,
                data: command.body[2..].to_vec(),
            },
        };

        let state = self.state.read().await;
        if let Some(keyed) = state.keyed_callbacks.get(&callback_key(class_id, command_id)) {
            deliver(keyed, &data);
        }
        deliver(&state.command_subscribers, &data);
    }

    /// Applies a node-info update to the node state and broadcasts the
    /// update to subscribers.
    pub(crate) async fn on_application_update(&self, update: ApplicationUpdate) {
        if update.status == update_status::NODE_INFO_RECEIVED {
            if update.body.len() < 3 {
                tracing::warn!(
                    "node info from node {} too short: {}",
                    update.node_id,
                    update.body.len()
                );
            } else {
                let mut state = self.state.write().await;
                state.device_class = DeviceClass {
                    basic: update.body[0],
                    generic: update.body[1],
                    specific: update.body[2],
                };
                let (supports, controls) = split_class_list(&update.body[3..]);
                state.command_classes = supports;
                state.control_command_classes = controls;
            }
        }

        let state = self.state.read().await;
        deliver(&state.update_subscribers, &update);
    }

    // ==================== Outbound primitives ====================

    /// Sends a command-class payload, surfacing a non-OK transmit status
    /// as [`Error::TransmitFailed`].
    async fn send_data(&self, command_class: u8, payload: &[u8]) -> Result<()> {
        let request =
            message::send_data_request(self.id, command_class, payload, DEFAULT_TRANSMIT_OPTIONS)?;
        let response = self.api.do_request(request).await?;
        let reply = message::send_data_response(&response)?;
        if reply.status != transmit_complete::OK {
            return Err(Error::TransmitFailed {
                status: reply.status,
            });
        }
        Ok(())
    }

    /// Fire-and-forget command: sends a payload without awaiting a report.
    pub(crate) async fn send(&self, command_class: u8, payload: &[u8]) -> Result<()> {
        let _state = self.state.write().await;
        self.send_data(command_class, payload).await
    }

    /// Sends a payload and awaits the matching report.
    ///
    /// A sink is registered under `(command_class, expected_command_id)`
    /// *before* the request goes out, so the report cannot slip past the
    /// waiter. Reports rejected by `filter` are discarded and the wait
    /// continues; the whole exchange shares one 10-second budget. The sink
    /// is unregistered on every exit path.
    pub(crate) async fn send_and_await(
        &self,
        command_class: u8,
        payload: &[u8],
        expected_command_id: u8,
        filter: Option<ReportFilter<'_>>,
    ) -> Result<ApplicationCommandData> {
        let key = callback_key(command_class, expected_command_id);

        let (token, mut reports) = {
            let mut state = self.state.write().await;
            let (token, reports) = state.register_keyed(key);
            if let Err(e) = self.send_data(command_class, payload).await {
                state.remove_keyed(key, token);
                return Err(e);
            }
            (token, reports)
        };

        let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, reports.recv()).await {
                Err(_) => {
                    self.unregister_keyed(key, token).await;
                    return Err(Error::Timeout {
                        timeout_ms: RESPONSE_TIMEOUT.as_millis() as u64,
                    });
                }
                Ok(None) => {
                    self.unregister_keyed(key, token).await;
                    return Err(Error::Closed);
                }
                Ok(Some(report)) => {
                    if filter.map_or(true, |matches| matches(&report)) {
                        self.unregister_keyed(key, token).await;
                        return Ok(report);
                    }
                    tracing::debug!(
                        "report from node {} rejected by filter, still waiting",
                        report.node_id
                    );
                }
            }
        }
    }

    async fn unregister_keyed(&self, key: u16, token: SubscriberToken) {
        self.state.write().await.remove_keyed(key, token);
    }

    // ==================== Load / refresh ====================

    /// Refreshes the node's state, reusing `cached` when possible, and
    /// returns the serialised state for the caller to persist.
    ///
    /// Without a usable cache this queries the node's protocol info and,
    /// for listening nodes, requests the node-info frame (which arrives as
    /// an unsolicited application update) and the manufacturer ids.
    pub async fn load(&self, cached: Option<&[u8]>) -> Result<Vec<u8>> {
        if let Some(blob) = cached {
            match NodeCache::from_bytes(blob, self.id) {
                Ok(cache) => {
                    self.apply_cache(&cache).await;
                    return cache.to_bytes();
                }
                Err(e) => {
                    tracing::info!("ignoring unusable cache for node {}: {e}", self.id);
                }
            }
        }

        self.refresh().await?;
        self.snapshot().await.to_bytes()
    }

    async fn refresh(&self) -> Result<()> {
        let request = message::node_protocol_info_request(self.id)?;
        let response = self.api.do_request(request).await?;
        let info = message::node_protocol_info_response(&response)?;

        // A generic class of zero is the controller's way of saying the
        // node id maps to nothing reachable.
        if info.generic_class == 0 {
            return Err(Error::NodeNotFound);
        }

        {
            let mut state = self.state.write().await;
            state.listening = info.listening;
            state.device_class = DeviceClass {
                basic: info.basic_class,
                generic: info.generic_class,
                specific: info.specific_class,
            };
        }

        if !info.listening {
            // Battery nodes only answer while awake; their class list has
            // to wait for a wakeup notification.
            return Ok(());
        }

        // Subscribe before issuing the request: the node info arrives as
        // an unsolicited update, not as the request's response.
        let (sink, mut updates) = mpsc::channel(1);
        let token = self.add_application_update_subscriber(sink).await;

        let result = self.request_node_info(&mut updates).await;
        self.remove_application_update_subscriber(token).await;
        result?;

        if let Some(manufacturer) = self.manufacturer_specific().await {
            let (manufacturer_id, product_type, product_id) = manufacturer.get().await?;
            let mut state = self.state.write().await;
            state.manufacturer_id = manufacturer_id;
            state.product_type = product_type;
            state.product_id = product_id;
        }

        Ok(())
    }

    async fn request_node_info(&self, updates: &mut mpsc::Receiver<ApplicationUpdate>) -> Result<()> {
        let request = message::request_node_info_request(self.id)?;
        let response = self.api.do_request(request).await?;
        let status = message::request_node_info_response(&response)?;
        if status != 0x01 {
            return Err(Error::protocol(format!(
                "node info request refused: 0x{status:02x}"
            )));
        }

        let deadline = tokio::time::Instant::now() + NODE_INFO_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, updates.recv()).await {
                Err(_) => {
                    return Err(Error::Timeout {
                        timeout_ms: NODE_INFO_TIMEOUT.as_millis() as u64,
                    })
                }
                Ok(None) => return Err(Error::Closed),
                Ok(Some(update)) => {
                    // State was already applied by the update dispatch;
                    // we only gate on a usable node-info frame here.
                    if update.status == update_status::NODE_INFO_RECEIVED
                        && update.body.len() >= 3
                    {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn apply_cache(&self, cache: &NodeCache) {
        let mut state = self.state.write().await;
        state.listening = cache.listening;
        state.device_class = DeviceClass {
            basic: cache.basic_class,
            generic: cache.generic_class,
            specific: cache.specific_class,
        };
        state.command_classes = cache.command_classes.clone();
        state.control_command_classes = cache.control_command_classes.clone();
        state.manufacturer_id = cache.manufacturer_id;
        state.product_type = cache.product_type;
        state.product_id = cache.product_id;
    }

    async fn snapshot(&self) -> NodeCache {
        let state = self.state.read().await;
        NodeCache {
            schema_version: cache::SCHEMA_VERSION.to_owned(),
            node_id: self.id,
            listening: state.listening,
            basic_class: state.device_class.basic,
            generic_class: state.device_class.generic,
            specific_class: state.device_class.specific,
            command_classes: state.command_classes.clone(),
            control_command_classes: state.control_command_classes.clone(),
            manufacturer_id: state.manufacturer_id,
            product_type: state.product_type,
            product_id: state.product_id,
        }
    }

    /// Test-and-load hook used by façade accessors and unit tests.
    #[cfg(test)]
    pub(crate) async fn set_command_classes(&self, classes: Vec<u8>) {
        self.state.write().await.command_classes = classes;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;

    use crate::protocol::message::message_type;
    use crate::protocol::packet::Packet;

    /// Request processor that answers from a canned script and records
    /// every request it saw.
    pub(crate) struct ScriptedApi {
        pub requests: StdMutex<Vec<Packet>>,
        pub replies: StdMutex<Vec<Result<Packet>>>,
    }

    impl ScriptedApi {
        pub fn new(replies: Vec<Result<Packet>>) -> Arc<Self> {
            Arc::new(Self {
                requests: StdMutex::new(Vec::new()),
                replies: StdMutex::new(replies),
            })
        }

        /// A successful two-stage send-data completion packet.
        pub fn send_data_ok() -> Result<Packet> {
            Ok(Packet::response(
                message_type::ZW_SEND_DATA,
                vec![0x0B, transmit_complete::OK, 0x00, 0x00],
            )
            .unwrap())
        }
    }

    impl RequestProcessor for ScriptedApi {
        fn do_request<'a>(
            &'a self,
            packet: Packet,
        ) -> Pin<Box<dyn Future<Output = Result<Packet>> + Send + 'a>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(packet);
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Err(Error::Closed)
                } else {
                    replies.remove(0)
                }
            })
        }
    }

    pub(crate) fn test_node(replies: Vec<Result<Packet>>) -> (Arc<Node>, Arc<ScriptedApi>) {
        let api = ScriptedApi::new(replies);
        let node = Arc::new(Node::new(5, Arc::clone(&api) as Arc<dyn RequestProcessor>));
        (node, api)
    }

    fn report(class_id: u8, command_id: u8, data: &[u8]) -> ApplicationCommand {
        let mut body = vec![class_id, command_id];
        body.extend_from_slice(data);
        ApplicationCommand {
            status: 0,
            node_id: 5,
            body,
        }
    }

    #[test]
    fn test_callback_key() {
        assert_eq!(callback_key(0x25, 0x03), 0x2503);
        assert_eq!(callback_key(0x00, 0xFF), 0x00FF);
        assert_eq!(callback_key(0xFF, 0x00), 0xFF00);
    }

    #[test]
    fn test_split_class_list() {
        let (supports, controls) =
            split_class_list(&[0x25, 0x27, command_class::MARK, 0x20, 0x32]);
        assert_eq!(supports, vec![0x25, 0x27]);
        assert_eq!(controls, vec![0x20, 0x32]);

        let (supports, controls) = split_class_list(&[0x25, 0x72]);
        assert_eq!(supports, vec![0x25, 0x72]);
        assert!(controls.is_empty());

        let (supports, controls) = split_class_list(&[]);
        assert!(supports.is_empty());
        assert!(controls.is_empty());
    }

    #[tokio::test]
    async fn test_send_and_await_resolves_on_report() {
        let (node, api) = test_node(vec![ScriptedApi::send_data_ok()]);

        let waiter = {
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                node.send_and_await(0x25, &[0x02], 0x03, None).await
            })
        };

        // Give the waiter time to register and send.
        tokio::time::sleep(Duration::from_millis(20)).await;
        node.on_application_command(report(0x25, 0x03, &[0xFF])).await;

        let data = waiter.await.unwrap().unwrap();
        assert_eq!(data.command.class_id, 0x25);
        assert_eq!(data.command.command_id, 0x03);
        assert_eq!(data.command.data, vec![0xFF]);

        // The registry is empty again.
        assert!(node.state.read().await.keyed_callbacks.is_empty());

        // The request carried the expected send-data body.
        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message_type, message_type::ZW_SEND_DATA);
        assert_eq!(
            requests[0].body,
            vec![0x05, 0x02, 0x25, 0x02, DEFAULT_TRANSMIT_OPTIONS]
        );
    }

    #[tokio::test]
    async fn test_send_and_await_filter_rejects() {
        let (node, _api) = test_node(vec![ScriptedApi::send_data_ok()]);

        let waiter = {
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                let filter: ReportFilter<'_> = &|data| data.command.data == [0x02];
                node.send_and_await(0x32, &[0x01], 0x02, Some(filter)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        node.on_application_command(report(0x32, 0x02, &[0x01])).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        node.on_application_command(report(0x32, 0x02, &[0x02])).await;

        let data = waiter.await.unwrap().unwrap();
        assert_eq!(data.command.data, vec![0x02]);
    }

    #[tokio::test]
    async fn test_send_and_await_transmit_failure_unregisters() {
        let (node, _api) = test_node(vec![Ok(Packet::response(
            message_type::ZW_SEND_DATA,
            vec![0x0B, transmit_complete::NO_ACK, 0x00, 0x00],
        )
        .unwrap())]);

        let result = node.send_and_await(0x25, &[0x02], 0x03, None).await;
        assert!(matches!(
            result,
            Err(Error::TransmitFailed {
                status: transmit_complete::NO_ACK
            })
        ));
        assert!(node.state.read().await.keyed_callbacks.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_subscribers_get_copies() {
        let (node, _api) = test_node(Vec::new());

        let (sink_a, mut rx_a) = mpsc::channel(1);
        let (sink_b, mut rx_b) = mpsc::channel(1);
        let token_a = node.add_application_command_subscriber(sink_a).await;
        let _token_b = node.add_application_command_subscriber(sink_b).await;

        node.on_application_command(report(0x20, 0x03, &[0x63])).await;

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.command.data, vec![0x63]);

        // Removal stops further deliveries.
        node.remove_application_command_subscriber(token_a).await;
        node.on_application_command(report(0x20, 0x03, &[0x00])).await;
        assert_eq!(rx_b.recv().await.unwrap().command.data, vec![0x00]);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_node_info_update_splits_classes() {
        let (node, _api) = test_node(Vec::new());

        node.on_application_update(ApplicationUpdate {
            status: update_status::NODE_INFO_RECEIVED,
            node_id: 5,
            body: vec![0x04, 0x10, 0x01, 0x25, 0x72, command_class::MARK, 0x20],
        })
        .await;

        assert_eq!(
            node.device_class().await,
            DeviceClass {
                basic: 0x04,
                generic: 0x10,
                specific: 0x01
            }
        );
        assert_eq!(node.command_classes().await, vec![0x25, 0x72]);
        assert_eq!(node.control_command_classes().await, vec![0x20]);
        assert!(node.supports_command_class(0x25).await);
        assert!(!node.supports_command_class(0x31).await);
    }
}
