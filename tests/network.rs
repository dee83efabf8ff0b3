//! End-to-end scenarios against the scripted simulator.

mod support;

use support::{serve_initialize, SimChannel};
use zwave::node::cache::{NodeCache, SCHEMA_VERSION};
use zwave::protocol::message::{
    self, message_type, DEFAULT_TRANSMIT_OPTIONS,
};
use zwave::{Error, Network};

const ALL_MESSAGE_TYPES: &[u8] = &[0x02, 0x07, 0x13, 0x15, 0x20, 0x41, 0x60];

#[tokio::test]
async fn initialize_populates_node_table_from_bitmap() {
    let channel = SimChannel::new(|mut wire, _session| async move {
        serve_initialize(
            &mut wire,
            ALL_MESSAGE_TYPES,
            &[1, 2, 3, 10, 97, 98, 99, 102, 104, 225, 232],
        )
        .await;
        wire.drain().await;
    });

    let network = Network::new(channel);
    network.open().await.unwrap();
    network.initialize().await.unwrap();

    let mut ids: Vec<u8> = network.get_nodes().await.iter().map(|n| n.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3, 10, 97, 98, 99, 102, 104, 225, 232]);

    // The controller itself never becomes a node.
    assert!(network.get_node(1).await.is_none());
    assert!(network.get_node(5).await.is_none());

    network.close().await.unwrap();
}

#[tokio::test]
async fn load_queries_node_and_binary_switch_round_trips() {
    let channel = SimChannel::new(|mut wire, _session| async move {
        serve_initialize(&mut wire, ALL_MESSAGE_TYPES, &[1, 5]).await;

        // load(None): protocol info for node 5, listening.
        let request = wire
            .expect_request(message_type::ZW_GET_NODE_PROTOCOL_INFO)
            .await;
        assert_eq!(request.body, vec![0x05]);
        wire.send_ack().await;
        wire.send_response(
            message_type::ZW_GET_NODE_PROTOCOL_INFO,
            vec![0xD3, 0x9C, 0x00, 0x04, 0x10, 0x01],
        )
        .await;

        // Node info request is acknowledged with a status byte; the class
        // list arrives later as an unsolicited update.
        let request = wire.expect_request(message_type::ZW_REQUEST_NODE_INFO).await;
        assert_eq!(request.body, vec![0x05]);
        wire.send_ack().await;
        wire.send_response(message_type::ZW_REQUEST_NODE_INFO, vec![0x01])
            .await;
        wire.send_unsolicited(
            message_type::ZW_APPLICATION_UPDATE,
            vec![0x84, 0x05, 0x05, 0x04, 0x10, 0x01, 0x25, 0x72],
        )
        .await;

        // Manufacturer-specific get, answered by an unsolicited report.
        let request = wire.expect_request(message_type::ZW_SEND_DATA).await;
        assert_eq!(&request.body[..4], &[0x05, 0x02, 0x72, 0x04]);
        wire.complete_send_data(&request, 0x00).await;
        wire.send_unsolicited(
            message_type::APPLICATION_COMMAND,
            vec![0x00, 0x05, 0x08, 0x72, 0x05, 0x00, 0x86, 0x00, 0x03, 0x00, 0x0B],
        )
        .await;

        // binary_switch.on()
        let request = wire.expect_request(message_type::ZW_SEND_DATA).await;
        assert_eq!(
            &request.body[..6],
            &[0x05, 0x03, 0x25, 0x01, 0xFF, DEFAULT_TRANSMIT_OPTIONS]
        );
        assert!((0x0B..=0x7F).contains(&request.body[6]));
        wire.complete_send_data(&request, 0x00).await;

        // binary_switch.is_on(): the get, then the state report.
        let request = wire.expect_request(message_type::ZW_SEND_DATA).await;
        assert_eq!(&request.body[..4], &[0x05, 0x02, 0x25, 0x02]);
        wire.complete_send_data(&request, 0x00).await;
        wire.send_unsolicited(
            message_type::APPLICATION_COMMAND,
            vec![0x00, 0x05, 0x03, 0x25, 0x03, 0xFF],
        )
        .await;

        wire.drain().await;
    });

    let network = Network::new(channel);
    network.open().await.unwrap();
    network.initialize().await.unwrap();

    let node = network.get_node(5).await.unwrap();
    let blob = node.load(None).await.unwrap();

    let cache = NodeCache::from_bytes(&blob, 5).unwrap();
    assert_eq!(cache.schema_version, SCHEMA_VERSION);
    assert!(cache.listening);
    assert_eq!(cache.generic_class, 0x10);
    assert_eq!(cache.command_classes, vec![0x25, 0x72]);
    assert_eq!(node.product_info().await, (0x0086, 0x0003, 0x000B));

    let switch = node.binary_switch().await.unwrap();
    switch.on().await.unwrap();
    assert!(switch.is_on().await.unwrap());

    // A class the node never advertised yields no façade.
    assert!(node.meter().await.is_none());

    network.close().await.unwrap();
}

#[tokio::test]
async fn load_reuses_cache_blob_without_radio_traffic() {
    let channel = SimChannel::new(|mut wire, _session| async move {
        serve_initialize(&mut wire, ALL_MESSAGE_TYPES, &[1, 5]).await;

        // The only traffic after initialize must be the version request;
        // a cached load that touched the radio would trip the message
        // type assertion here.
        wire.expect_request(message_type::GET_VERSION).await;
        wire.send_ack().await;
        let mut version = b"Z-Wave 2.78".to_vec();
        version.extend_from_slice(&[0x00, 0x01]);
        wire.send_response(message_type::GET_VERSION, version).await;
        wire.drain().await;
    });

    let network = Network::new(channel);
    network.open().await.unwrap();
    network.initialize().await.unwrap();

    let cached = NodeCache {
        schema_version: SCHEMA_VERSION.to_owned(),
        node_id: 5,
        listening: true,
        basic_class: 0x04,
        generic_class: 0x10,
        specific_class: 0x01,
        command_classes: vec![0x25],
        control_command_classes: Vec::new(),
        manufacturer_id: 0x0086,
        product_type: 0x0003,
        product_id: 0x000B,
    };
    let blob = cached.to_bytes().unwrap();

    let node = network.get_node(5).await.unwrap();
    let returned = node.load(Some(&blob)).await.unwrap();
    assert_eq!(NodeCache::from_bytes(&returned, 5).unwrap(), cached);
    assert!(node.binary_switch().await.is_some());
    assert!(node.is_listening().await);

    network.do_request(message::get_version_request()).await.unwrap();
    network.close().await.unwrap();
}

#[tokio::test]
async fn unsupported_message_type_is_refused_without_touching_the_wire() {
    let channel = SimChannel::new(|mut wire, _session| async move {
        // Capabilities deliberately omit ZWSendData (0x13).
        serve_initialize(&mut wire, &[0x02, 0x07, 0x15, 0x20], &[1, 5]).await;

        // If the gate leaked the send-data frame onto the wire, this
        // expectation would see message type 0x13 and fail.
        wire.expect_request(message_type::GET_VERSION).await;
        wire.send_ack().await;
        let mut version = b"Z-Wave 2.78".to_vec();
        version.extend_from_slice(&[0x00, 0x01]);
        wire.send_response(message_type::GET_VERSION, version).await;
        wire.drain().await;
    });

    let network = Network::new(channel);
    network.open().await.unwrap();
    network.initialize().await.unwrap();

    let request =
        message::send_data_request(5, 0x25, &[0x01, 0xFF], DEFAULT_TRANSMIT_OPTIONS).unwrap();
    let result = network.do_request(request).await;
    assert!(matches!(
        result,
        Err(Error::UnsupportedMessageType { message_type: 0x13 })
    ));

    network.do_request(message::get_version_request()).await.unwrap();
    network.close().await.unwrap();
}

#[tokio::test]
async fn controller_must_sit_at_node_one() {
    let channel = SimChannel::new(|mut wire, _session| async move {
        wire.expect_request(message_type::SERIAL_API_GET_CAPABILITIES)
            .await;
        wire.send_ack().await;
        wire.send_response(
            message_type::SERIAL_API_GET_CAPABILITIES,
            support::capabilities_body(ALL_MESSAGE_TYPES),
        )
        .await;

        wire.expect_request(message_type::GET_VERSION).await;
        wire.send_ack().await;
        let mut version = b"Z-Wave 2.78".to_vec();
        version.extend_from_slice(&[0x00, 0x01]);
        wire.send_response(message_type::GET_VERSION, version).await;

        // A controller that thinks it is node 2.
        wire.expect_request(message_type::MEMORY_GET_ID).await;
        wire.send_ack().await;
        wire.send_response(
            message_type::MEMORY_GET_ID,
            vec![0xC0, 0x01, 0x23, 0x45, 0x02],
        )
        .await;
        wire.drain().await;
    });

    let network = Network::new(channel);
    network.open().await.unwrap();
    assert!(matches!(
        network.initialize().await,
        Err(Error::Protocol { .. })
    ));
    network.close().await.unwrap();
}
