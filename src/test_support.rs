// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bespoke mocks for the traits defined in [`crate::mqtt_client`], used by this crate's own
//! unit tests to drive dispatch and agent logic without a live broker connection.
//!
//! Hand-rolled fakes rather than generated ones, since the seam here (a handful of async
//! methods) is small enough that a mocking framework buys little.

#![cfg(test)]
#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::control_packet::{PublishInfo, QoS, SubscribeTopicFilter};
use crate::error::ConnectionError;
use crate::mqtt_client::{MqttEventLoop, MqttOperations, PolledEvent};

#[derive(Default)]
struct FailNext {
    connect: Option<ConnectionError>,
    publish: Option<ConnectionError>,
    subscribe: Option<ConnectionError>,
    unsubscribe: Option<ConnectionError>,
    ping: Option<ConnectionError>,
    disconnect: Option<ConnectionError>,
}

/// A fake [`MqttOperations`] that always succeeds unless told, once, to fail the next call of a
/// given kind. Records every call it receives, in order, for assertions.
pub struct MockOperations {
    next_packet_id: AtomicU16,
    fail: Mutex<FailNext>,
    calls: Mutex<Vec<String>>,
    resent: Mutex<Vec<PublishInfo>>,
}

impl MockOperations {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_packet_id: AtomicU16::new(1),
            fail: Mutex::new(FailNext::default()),
            calls: Mutex::new(Vec::new()),
            resent: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_connect(&self, err: ConnectionError) {
        self.fail.lock().unwrap().connect = Some(err);
    }

    pub fn fail_next_publish(&self, err: ConnectionError) {
        self.fail.lock().unwrap().publish = Some(err);
    }

    pub fn fail_next_subscribe(&self, err: ConnectionError) {
        self.fail.lock().unwrap().subscribe = Some(err);
    }

    pub fn fail_next_disconnect(&self, err: ConnectionError) {
        self.fail.lock().unwrap().disconnect = Some(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn resent_publishes(&self) -> Vec<PublishInfo> {
        self.resent.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn next_packet_id(&self) -> u16 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MockOperations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MqttOperations for MockOperations {
    async fn connect(&self) -> Result<(), ConnectionError> {
        self.log("connect");
        match self.fail.lock().unwrap().connect.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn publish(&self, info: &PublishInfo) -> Result<Option<u16>, ConnectionError> {
        self.log(format!("publish({})", info.topic));
        if let Some(err) = self.fail.lock().unwrap().publish.take() {
            return Err(err);
        }
        if info.qos == QoS::AtMostOnce {
            return Ok(None);
        }
        Ok(Some(self.next_packet_id()))
    }

    async fn resend_publish(&self, info: &PublishInfo) -> Result<(), ConnectionError> {
        self.log(format!("resend_publish({})", info.topic));
        self.resent.lock().unwrap().push(info.clone());
        Ok(())
    }

    async fn subscribe(&self, filters: &[SubscribeTopicFilter]) -> Result<u16, ConnectionError> {
        self.log(format!("subscribe({})", filters.len()));
        if let Some(err) = self.fail.lock().unwrap().subscribe.take() {
            return Err(err);
        }
        Ok(self.next_packet_id())
    }

    async fn unsubscribe(&self, filters: &[SubscribeTopicFilter]) -> Result<u16, ConnectionError> {
        self.log(format!("unsubscribe({})", filters.len()));
        if let Some(err) = self.fail.lock().unwrap().unsubscribe.take() {
            return Err(err);
        }
        Ok(self.next_packet_id())
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.log("ping");
        match self.fail.lock().unwrap().ping.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.log("disconnect");
        match self.fail.lock().unwrap().disconnect.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A fake [`MqttEventLoop`] fed from a channel, so a test can hand the agent a scripted sequence
/// of incoming events (or none at all, forever) without a live broker connection.
pub struct MockEventLoop {
    rx: tokio::sync::mpsc::UnboundedReceiver<PolledEvent>,
}

impl MockEventLoop {
    #[must_use]
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<PolledEvent>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl MqttEventLoop for MockEventLoop {
    async fn poll(&mut self) -> Result<PolledEvent, ConnectionError> {
        match self.rx.recv().await {
            Some(event) => Ok(event),
            // No more events will ever arrive (every sender dropped); park forever rather than
            // reporting a fabricated connection error, so a test driving the agent via `select!`
            // against `command_rx` is not spuriously interrupted by event-loop exhaustion.
            None => std::future::pending().await,
        }
    }
}
