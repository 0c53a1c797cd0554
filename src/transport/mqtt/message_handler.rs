//! Pure routing of rumqttc events
//!
//! Translates raw event-loop events into [`EventRoute`] decisions that
//! the session supervisor acts on.

use crate::transport::Message;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged {
                        session_present: connack.session_present,
                    }
                }
                Packet::ConnAck(connack) => {
                    EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                }
                Packet::Publish(publish) => EventRoute::MessageReceived(Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos,
                    retain: publish.retain,
                }),
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                    packet_id: pubcomp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: Self::granted_qos(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { packet_id: *pkid },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Granted QoS per filter, `None` for a rejected filter (pure function)
    pub fn granted_qos(return_codes: &[SubscribeReasonCode]) -> Vec<Option<QoS>> {
        return_codes
            .iter()
            .map(|code| match code {
                SubscribeReasonCode::Success(qos) => Some(*qos),
                SubscribeReasonCode::Failure => None,
            })
            .collect()
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(granted: &[Option<QoS>]) -> Result<(), String> {
        if granted.iter().any(Option::is_none) {
            Err(format!("Subscription rejected by broker: {granted:?}"))
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    ConnectionRefused(String),
    /// Message received on a subscribed topic
    MessageReceived(Message),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Local DISCONNECT written to the wire
    DisconnectSent,
    SubscriptionConfirmed {
        packet_id: u16,
        granted: Vec<Option<QoS>>,
    },
    /// PUBLISH written to the wire (packet id 0 for QoS 0)
    PublishSent { packet_id: u16 },
    PublishAcknowledged { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    OutgoingEvent,
}
