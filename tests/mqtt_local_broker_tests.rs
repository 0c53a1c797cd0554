//! MQTT session tests against an in-process broker
//!
//! A plain `TcpListener` plays the broker: it decodes what the session
//! sends with rumqttc's own packet codec and answers with CONNACK, PUBACK
//! and SUBACK. This exercises the real supervisor (ConnAck handling,
//! resubscription, acknowledgement mapping and lost-publish reporting)
//! without an external broker.


use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{
    self, ConnAck, Connect, ConnectReturnCode, Packet, PubAck, SubAck, SubscribeReasonCode,
};
use rumqttc::mqttbytes::Error as PacketError;
use rumqttc::QoS;
use sensornode::link::{AddressInfo, LinkEvent, LinkManager};
use sensornode::node::session_options;
use sensornode::testing::ScriptedLinkDriver;
use sensornode::transport::mqtt::{MqttError, MqttSession};
use sensornode::transport::{CorrelationId, SessionEvent, Transport};
use sensornode::NodeConfig;
use std::time::Duration;
use test_helpers::test_config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);
const MAX_PACKET_SIZE: usize = 64 * 1024;

/// One client connection as seen by the broker
struct BrokerConnection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl BrokerConnection {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    async fn read_packet(&mut self) -> Packet {
        loop {
            match v4::read(&mut self.buffer, MAX_PACKET_SIZE) {
                Ok(packet) => return packet,
                Err(PacketError::InsufficientBytes(_)) => {}
                Err(e) => panic!("malformed packet from client: {e:?}"),
            }
            let read = self.stream.read_buf(&mut self.buffer).await.unwrap();
            assert!(read > 0, "client closed the connection");
        }
    }

    async fn next_packet(&mut self) -> Packet {
        timeout(WAIT, self.read_packet())
            .await
            .expect("no packet from client")
    }

    /// Nothing else arrives for a while
    async fn assert_quiet(&mut self) {
        if let Ok(packet) = timeout(QUIET, self.read_packet()).await {
            panic!("unexpected packet: {packet:?}");
        }
    }

    async fn send(&mut self, encode: impl FnOnce(&mut BytesMut) -> Result<usize, PacketError>) {
        let mut out = BytesMut::new();
        encode(&mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    /// Read CONNECT and accept it
    async fn accept_session(&mut self) -> Connect {
        let connect = self.expect_connect().await;
        self.send_connack().await;
        connect
    }

    async fn expect_connect(&mut self) -> Connect {
        match self.next_packet().await {
            Packet::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {other:?}"),
        }
    }

    async fn send_connack(&mut self) {
        self.send(|out| ConnAck::new(ConnectReturnCode::Success, false).write(out))
            .await;
    }

    /// Next packet, acknowledged the way a broker would
    async fn next_acked(&mut self) -> Packet {
        let packet = self.next_packet().await;
        match &packet {
            Packet::Publish(publish) if publish.qos != QoS::AtMostOnce => {
                let pkid = publish.pkid;
                self.send(|out| PubAck::new(pkid).write(out)).await;
            }
            Packet::Subscribe(subscribe) => {
                let codes = subscribe
                    .filters
                    .iter()
                    .map(|filter| SubscribeReasonCode::Success(filter.qos))
                    .collect();
                let pkid = subscribe.pkid;
                self.send(|out| SubAck::new(pkid, codes).write(out)).await;
            }
            _ => {}
        }
        packet
    }
}

fn subscription(packet: Packet) -> Vec<(String, QoS)> {
    match packet {
        Packet::Subscribe(subscribe) => subscribe
            .filters
            .into_iter()
            .map(|filter| (filter.path, filter.qos))
            .collect(),
        other => panic!("expected SUBSCRIBE, got {other:?}"),
    }
}

/// Online status first, then each subscription exactly once
async fn expect_session_setup(conn: &mut BrokerConnection) {
    match conn.next_acked().await {
        Packet::Publish(birth) => {
            assert_eq!(birth.topic, "esp32/status");
            assert_eq!(birth.qos, QoS::AtLeastOnce);
            assert!(birth.retain);
            assert_eq!(&birth.payload[..], br#"{"status":"online"}"#);
        }
        other => panic!("expected online status, got {other:?}"),
    }
    assert_eq!(
        subscription(conn.next_acked().await),
        vec![("esp32/commands".to_string(), QoS::AtLeastOnce)]
    );
    assert_eq!(
        subscription(conn.next_acked().await),
        vec![("esp32/sensors/#".to_string(), QoS::AtMostOnce)]
    );
    conn.assert_quiet().await;
}

async fn local_broker() -> (TcpListener, NodeConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = test_config();
    config.mqtt.broker_url = format!("mqtt://127.0.0.1:{port}");
    config.mqtt.reconnect.initial_delay_ms = 10;
    config.mqtt.reconnect.max_delay_ms = 50;
    (listener, config)
}

fn session_for(config: &NodeConfig) -> MqttSession {
    MqttSession::new(session_options(config, &config.mqtt.broker_url).unwrap()).unwrap()
}

/// Receive events until one matches, keeping everything seen
async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    seen: &mut Vec<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            seen.push(event.clone());
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("session event did not arrive")
}

fn acknowledged(event: &SessionEvent, id: CorrelationId) -> bool {
    matches!(event, SessionEvent::Acknowledged { correlation_id, .. } if *correlation_id == id)
}

#[tokio::test]
async fn test_reconnect_reapplies_online_status_and_subscriptions_once() {
    let (listener, config) = local_broker().await;
    let session = session_for(&config);
    session.connect().await.unwrap();

    let mut first = BrokerConnection::accept(&listener).await;
    let connect = first.accept_session().await;
    assert_eq!(connect.client_id, "esp32-qemu-01");
    let will = connect.last_will.expect("last will registered");
    assert_eq!(will.topic, "esp32/status");
    assert_eq!(&will.message[..], br#"{"status":"offline"}"#);
    assert_eq!(will.qos, QoS::AtLeastOnce);
    assert!(will.retain);

    expect_session_setup(&mut first).await;
    session.wait_connected(WAIT).await.unwrap();
    assert_eq!(session.health_metrics().await.reconnect_count, 0);

    // Broker goes away; the session comes back on its own
    drop(first);

    let mut second = BrokerConnection::accept(&listener).await;
    let connect = second.accept_session().await;
    assert_eq!(connect.client_id, "esp32-qemu-01");
    assert!(connect.last_will.is_some());

    expect_session_setup(&mut second).await;
    session.wait_connected(WAIT).await.unwrap();
    assert_eq!(session.health_metrics().await.reconnect_count, 1);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_acknowledgements_follow_qos_and_lost_publishes_are_reported() {
    let (listener, config) = local_broker().await;
    let session = session_for(&config);
    let mut events = session.events();
    let mut seen = Vec::new();
    session.connect().await.unwrap();

    let mut conn = BrokerConnection::accept(&listener).await;
    conn.accept_session().await;
    expect_session_setup(&mut conn).await;
    session.wait_connected(WAIT).await.unwrap();

    // QoS 1: acknowledged with the packet id the broker saw
    let reading = session
        .publish("esp32/sensors/temperature", b"{}".to_vec(), QoS::AtLeastOnce, false)
        .await
        .unwrap();
    let Packet::Publish(on_wire) = conn.next_acked().await else {
        panic!("expected PUBLISH");
    };
    match wait_for_event(&mut events, &mut seen, |e| acknowledged(e, reading)).await {
        SessionEvent::Acknowledged { packet_id, .. } => assert_eq!(packet_id, on_wire.pkid),
        other => panic!("unexpected event {other:?}"),
    }

    // QoS 0: sent, never acknowledged
    let fire_and_forget = session
        .publish("esp32/status", b"{}".to_vec(), QoS::AtMostOnce, false)
        .await
        .unwrap();
    let Packet::Publish(on_wire) = conn.next_acked().await else {
        panic!("expected PUBLISH");
    };
    assert_eq!(on_wire.qos, QoS::AtMostOnce);
    wait_for_event(&mut events, &mut seen, |e| {
        matches!(e, SessionEvent::Published { correlation_id, qos: QoS::AtMostOnce, .. }
            if *correlation_id == fire_and_forget)
    })
    .await;

    let marker = session
        .publish("esp32/sensors/humidity", b"{}".to_vec(), QoS::AtLeastOnce, false)
        .await
        .unwrap();
    conn.next_acked().await;
    wait_for_event(&mut events, &mut seen, |e| acknowledged(e, marker)).await;
    assert!(!seen.iter().any(|e| acknowledged(e, fire_and_forget)));

    // Sent but never acknowledged before the connection drops
    let stranded = session
        .publish("esp32/sensors/temperature", b"{}".to_vec(), QoS::AtLeastOnce, false)
        .await
        .unwrap();
    conn.next_packet().await;
    drop(conn);

    match wait_for_event(&mut events, &mut seen, |e| {
        matches!(e, SessionEvent::PublishLost { correlation_id, .. } if *correlation_id == stranded)
    })
    .await
    {
        SessionEvent::PublishLost { topic, .. } => assert_eq!(topic, "esp32/sensors/temperature"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!seen.iter().any(|e| acknowledged(e, stranded)));
}

#[tokio::test]
async fn test_online_status_held_back_when_link_drops_before_connack() {
    let (listener, config) = local_broker().await;
    let link = LinkManager::new(Box::new(ScriptedLinkDriver::new(vec![])));
    link.handle_event(LinkEvent::AddressAssigned(AddressInfo::new(
        "127.0.0.1".parse().unwrap(),
    )));
    let session = session_for(&config).with_link(link.readiness());
    session.connect().await.unwrap();

    let mut conn = BrokerConnection::accept(&listener).await;
    conn.expect_connect().await;
    link.handle_event(LinkEvent::Disconnected);
    conn.send_connack().await;

    // Subscriptions are restored, the online status is not
    assert_eq!(
        subscription(conn.next_acked().await),
        vec![("esp32/commands".to_string(), QoS::AtLeastOnce)]
    );
    assert_eq!(
        subscription(conn.next_acked().await),
        vec![("esp32/sensors/#".to_string(), QoS::AtMostOnce)]
    );
    conn.assert_quiet().await;

    let result = session
        .publish("esp32/status", b"{}".to_vec(), QoS::AtLeastOnce, true)
        .await;
    assert!(matches!(result, Err(MqttError::LinkNotReady)));
}
