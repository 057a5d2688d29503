// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types describing the MQTT 3.1.1 control packets the agent exchanges with the broker.
//!
//! These are thin wrappers/aliases over [`rumqttc`]'s wire types. The wire codec itself
//! (serialization, deserialization, the transport read/write loop) is treated as an external
//! collaborator and is not reimplemented here.

use std::time::Duration;

use bytes::Bytes;

use crate::topic::TopicFilter;

/// Quality of Service level for a PUBLISH, SUBSCRIBE, or UNSUBSCRIBE.
pub type QoS = rumqttc::QoS;

/// Subscription acknowledgment code returned by the broker in a SUBACK, one per requested filter.
pub type SubscribeReasonCode = rumqttc::SubscribeReasonCode;

/// Reason the broker refused a CONNECT attempt.
pub type ConnectReturnCode = rumqttc::ConnectReturnCode;

/// A PUBLISH delivered to, or originating from, this client.
#[derive(Debug, Clone)]
pub struct PublishInfo {
    /// Topic the message was (or will be) published on.
    pub topic: String,
    /// Message body.
    pub payload: Bytes,
    /// Quality of Service the publish was (or will be) sent at.
    pub qos: QoS,
    /// Whether the broker should retain this message for future subscribers.
    pub retain: bool,
    /// Whether this is a redelivery of a previously-sent packet id.
    pub dup: bool,
}

impl PublishInfo {
    /// Construct a new outgoing publish with `dup` cleared.
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, retain: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            dup: false,
        }
    }

    /// Number of bytes the fixed header, remaining-length byte, and 2-byte topic-length
    /// prefix will occupy on the wire, not counting the topic bytes or payload.
    ///
    pub(crate) const FIXED_HEADER_BYTES: usize = 4;
}

/// Last Will and Testament, published by the broker if the client disconnects ungracefully.
#[derive(Debug, Clone)]
pub struct WillInfo {
    /// Will message contents.
    pub publish: PublishInfo,
}

/// Parameters for a CONNECT command.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    /// MQTT client identifier.
    pub client_id: String,
    /// Whether to start a clean session (discard any prior session state).
    pub clean_session: bool,
    /// Keep-alive interval, in seconds, advertised to the broker.
    pub keep_alive_secs: u16,
    /// Username for username/password authentication, if any.
    pub username: Option<String>,
    /// Password for username/password authentication, if any.
    pub password: Option<String>,
    /// Last Will and Testament the broker should publish if this client disconnects
    /// ungracefully, if any.
    pub will: Option<WillInfo>,
    /// How long the CONNECT command waits for a CONNACK before the underlying client gives up.
    pub connack_timeout: Duration,
}

impl ConnectInfo {
    /// Construct connect parameters with no will and the default CONNACK timeout.
    #[must_use]
    pub fn new(client_id: impl Into<String>, clean_session: bool, keep_alive_secs: u16) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
            keep_alive_secs,
            username: None,
            password: None,
            will: None,
            connack_timeout: DEFAULT_CONNACK_TIMEOUT,
        }
    }
}

/// Default CONNACK timeout.
pub const DEFAULT_CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

/// A topic filter together with the QoS requested for it.
///
/// Used for both SUBSCRIBE and UNSUBSCRIBE command arguments, reusing one argument shape for
/// both operations (the QoS field is ignored on UNSUBSCRIBE).
#[derive(Debug, Clone)]
pub struct SubscribeTopicFilter {
    /// The topic filter.
    pub filter: TopicFilter,
    /// Requested Quality of Service (ignored for UNSUBSCRIBE).
    pub qos: QoS,
}
