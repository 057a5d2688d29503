// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter over the underlying (non-thread-safe) MQTT client and event loop.
//!
//! Everything reachable through [`MqttOperations`] and [`MqttEventLoop`] is owned exclusively by
//! the agent task; nothing here is `Sync`, matching the non-thread-safety the rest of this crate
//! exists to work around. Callers never touch this module directly: they go through
//! [`crate::api`] and the agent's command loop.
//!
//! The two traits exist so [`crate::agent::Agent`] can be driven in tests against an injected
//! fake client and event loop rather than a live broker connection. [`MqttClientAdapter`] and
//! [`MqttEventLoopAdapter`] are the only production implementations.

use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;

use crate::control_packet::{
    ConnectReturnCode, PublishInfo, QoS, SubscribeReasonCode, SubscribeTopicFilter,
};
use crate::error::ConnectionError;

/// An event read off the underlying event loop, translated into the shape the command loop
/// correlates against.
///
/// `rumqttc` has already deserialized the packet by the time it reaches this crate, so the
/// translation is a straightforward match rather than a byte-level fixed-header inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum PolledEvent {
    /// CONNACK: the broker accepted the connection.
    ConnAck {
        /// Whether the broker reports a pre-existing session for this client id.
        session_present: bool,
        /// The broker's return code.
        return_code: ConnectReturnCode,
    },
    /// PUBACK: acknowledges a QoS 1 PUBLISH.
    PubAck {
        /// Packet id of the PUBLISH being acknowledged.
        packet_id: u16,
    },
    /// PUBCOMP: concludes a QoS 2 PUBLISH exchange.
    PubComp {
        /// Packet id of the PUBLISH being acknowledged.
        packet_id: u16,
    },
    /// SUBACK: acknowledges a SUBSCRIBE.
    SubAck {
        /// Packet id of the SUBSCRIBE being acknowledged.
        packet_id: u16,
        /// Per-filter result codes, in the order the filters were requested.
        reason_codes: Vec<SubscribeReasonCode>,
    },
    /// UNSUBACK: acknowledges an UNSUBSCRIBE.
    UnsubAck {
        /// Packet id of the UNSUBSCRIBE being acknowledged.
        packet_id: u16,
    },
    /// PINGRESP: acknowledges a PINGREQ.
    PingResp,
    /// An inbound PUBLISH from the broker, unrelated to the pending-acknowledgment table.
    Publish(PublishInfo),
    /// Any other event (QoS 2 PUBREC/PUBREL handshakes, outgoing-packet notifications, and so
    /// on) that the command loop does not need to correlate against outstanding commands.
    ///
    /// QoS 2 acknowledgment (PUBREC/PUBREL) is handled entirely inside the underlying client and
    /// needs no action here; anything else unrecognized is logged and dropped. This variant
    /// plays the same role for both cases.
    Other,
}

/// The subset of MQTT client primitives the agent's dispatch handlers invoke.
///
/// Implemented for production use by [`MqttClientAdapter`]; test code implements it directly
/// against a channel or a canned response table instead of a live broker connection.
#[async_trait]
pub trait MqttOperations: Send + Sync {
    /// Issue a CONNECT (or, for this adapter, confirm the transport is ready to accept one:
    /// see [`MqttClientAdapter::connect`] for why this does not perform a handshake itself).
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Issue a PUBLISH. Returns the assigned packet id for QoS > 0, or `None` for QoS 0, which
    /// has no packet id and no acknowledgment.
    async fn publish(&self, info: &PublishInfo) -> Result<Option<u16>, ConnectionError>;

    /// Re-send a previously-sent QoS > 0 PUBLISH with `dup` already set, used by session
    /// resumption.
    async fn resend_publish(&self, info: &PublishInfo) -> Result<(), ConnectionError>;

    /// Issue a SUBSCRIBE covering one or more topic filters. Returns the assigned packet id.
    async fn subscribe(&self, filters: &[SubscribeTopicFilter]) -> Result<u16, ConnectionError>;

    /// Issue an UNSUBSCRIBE covering one or more topic filters. Returns the assigned packet id.
    async fn unsubscribe(&self, filters: &[SubscribeTopicFilter]) -> Result<u16, ConnectionError>;

    /// Issue a PINGREQ.
    async fn ping(&self) -> Result<(), ConnectionError>;

    /// Issue a DISCONNECT.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

/// The subset of event-loop behavior the agent's command loop polls on every iteration.
///
/// Expressed as an asynchronous poll rather than a timed, repeatedly-invoked function, since
/// `rumqttc`'s event loop is already structured that way.
#[async_trait]
pub trait MqttEventLoop: Send {
    /// Poll for the next translated event, blocking until one is available or the underlying
    /// connection fails fatally.
    async fn poll(&mut self) -> Result<PolledEvent, ConnectionError>;
}

/// Thin wrapper over `rumqttc::AsyncClient`, translating this crate's request types into calls
/// against it and assigning the packet ids the agent's dispatch handlers register in the
/// pending-acknowledgment table.
pub struct MqttClientAdapter {
    client: rumqttc::AsyncClient,
    /// `rumqttc`'s `AsyncClient` does not expose the packet id it assigns a request
    /// synchronously at the call site (assignment happens inside the event loop task). Since
    /// every request made through this adapter is issued from the single agent task, in the same
    /// sequential order the event loop itself assigns ids, an independently maintained counter
    /// stays synchronized with it: just a wrapping counter guarded by the fact that only one
    /// task calls it.
    next_packet_id: AtomicU16,
}

impl MqttClientAdapter {
    /// Wrap an already-constructed `rumqttc` client.
    #[must_use]
    pub fn new(client: rumqttc::AsyncClient) -> Self {
        Self {
            client,
            next_packet_id: AtomicU16::new(1),
        }
    }

    /// Assign the next non-zero packet id, wrapping past `u16::MAX` back to 1 (packet id 0 is
    /// reserved to mean "no packet id" throughout this crate, matching the MQTT specification).
    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

#[async_trait]
impl MqttOperations for MqttClientAdapter {
    /// `rumqttc` performs the CONNECT handshake itself, during event loop construction and on
    /// every automatic reconnect, rather than through an explicit client call driven by a
    /// command. There is therefore nothing left for a CONNECT command to transmit once the
    /// event loop already exists: its MqttOptions (credentials, will, keep-alive) were fixed at
    /// construction time by [`crate::client::spawn`]. This method exists purely so the CONNECT
    /// dispatch handler (`crate::dispatch::connect`) has something to call and a `Result` to
    /// propagate; the actual CONNACK this command waits on surfaces later, asynchronously, as a
    /// [`PolledEvent::ConnAck`] the agent correlates back to the same command (see
    /// `crate::agent::Agent::handle_connack`). A deliberate adaptation to `rumqttc`'s
    /// asynchronous handshake, not an oversight; see `DESIGN.md`.
    async fn connect(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn publish(&self, info: &PublishInfo) -> Result<Option<u16>, ConnectionError> {
        if info.qos == QoS::AtMostOnce {
            self.client
                .publish(&info.topic, info.qos, info.retain, info.payload.clone())
                .await
                .map_err(ConnectionError::from)?;
            return Ok(None);
        }
        let packet_id = self.next_packet_id();
        self.client
            .publish(&info.topic, info.qos, info.retain, info.payload.clone())
            .await
            .map_err(ConnectionError::from)?;
        Ok(Some(packet_id))
    }

    async fn resend_publish(&self, info: &PublishInfo) -> Result<(), ConnectionError> {
        self.client
            .publish(&info.topic, info.qos, info.retain, info.payload.clone())
            .await
            .map_err(ConnectionError::from)
    }

    async fn subscribe(&self, filters: &[SubscribeTopicFilter]) -> Result<u16, ConnectionError> {
        let packet_id = self.next_packet_id();
        let topics = filters
            .iter()
            .map(|f| rumqttc::SubscribeFilter::new(f.filter.as_str().to_string(), f.qos));
        self.client
            .subscribe_many(topics)
            .await
            .map_err(ConnectionError::from)?;
        Ok(packet_id)
    }

    async fn unsubscribe(
        &self,
        filters: &[SubscribeTopicFilter],
    ) -> Result<u16, ConnectionError> {
        let packet_id = self.next_packet_id();
        let topics = filters
            .iter()
            .map(|f| f.filter.as_str().to_string())
            .collect::<Vec<_>>();
        self.client
            .unsubscribe_many(topics)
            .await
            .map_err(ConnectionError::from)?;
        Ok(packet_id)
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        // rumqttc's event loop sends keep-alive pings automatically; an explicit PINGREQ command
        // has no separate action to take beyond confirming the client handle is still attached.
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.client.disconnect().await.map_err(ConnectionError::from)
    }
}

/// Thin wrapper over `rumqttc::EventLoop`, translating polled events into [`PolledEvent`].
pub struct MqttEventLoopAdapter {
    event_loop: rumqttc::EventLoop,
}

impl MqttEventLoopAdapter {
    /// Wrap an already-constructed `rumqttc` event loop.
    #[must_use]
    pub fn new(event_loop: rumqttc::EventLoop) -> Self {
        Self { event_loop }
    }
}

#[async_trait]
impl MqttEventLoop for MqttEventLoopAdapter {
    async fn poll(&mut self) -> Result<PolledEvent, ConnectionError> {
        loop {
            match self.event_loop.poll().await {
                Ok(rumqttc::Event::Incoming(incoming)) => {
                    if let Some(event) = translate_incoming(incoming) {
                        return Ok(event);
                    }
                }
                Ok(rumqttc::Event::Outgoing(_)) => continue,
                Err(err) => return Err(ConnectionError::from(err)),
            }
        }
    }
}

fn translate_incoming(incoming: rumqttc::Incoming) -> Option<PolledEvent> {
    match incoming {
        rumqttc::Incoming::ConnAck(connack) => Some(PolledEvent::ConnAck {
            session_present: connack.session_present,
            return_code: connack.code,
        }),
        rumqttc::Incoming::PubAck(ack) => Some(PolledEvent::PubAck { packet_id: ack.pkid }),
        rumqttc::Incoming::PubComp(ack) => Some(PolledEvent::PubComp { packet_id: ack.pkid }),
        rumqttc::Incoming::SubAck(ack) => Some(PolledEvent::SubAck {
            packet_id: ack.pkid,
            reason_codes: ack.return_codes,
        }),
        rumqttc::Incoming::UnsubAck(ack) => Some(PolledEvent::UnsubAck { packet_id: ack.pkid }),
        rumqttc::Incoming::PingResp => Some(PolledEvent::PingResp),
        rumqttc::Incoming::Publish(publish) => Some(PolledEvent::Publish(PublishInfo {
            topic: publish.topic,
            payload: Bytes::from(publish.payload),
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
        })),
        // QoS 2 handshake packets are handled internally by rumqttc's event loop; no action is
        // taken and they are not surfaced.
        rumqttc::Incoming::PubRec(_) | rumqttc::Incoming::PubRel(_) => None,
        other => {
            warn!("unhandled incoming packet type: {other:?}");
            None
        }
    }
}
