// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! A thread-safe serialization layer atop a non-thread-safe MQTT 3.1.1 client.
//!
//! A single dedicated task, [`agent::Agent`], owns the underlying `rumqttc` client and event
//! loop and is the only code in this crate that ever touches either of them. Any number of
//! producer tasks submit typed [`command::Command`]s through [`api::AgentClient`], a
//! thread-safe handle cloneable across tasks; the agent drains those commands, executes each
//! against the broker, tracks broker acknowledgments for the ones that expect one in a
//! fixed-capacity [`pending_ack::PendingAckTable`], and reports each command's outcome back to
//! its caller exactly once.
//!
//! Call [`client::spawn`] with a [`MqttConnectionSettings`] to construct the transport and start
//! the agent; the returned [`client::AgentHandle::client`] is then the entry point for issuing
//! CONNECT, PUBLISH, SUBSCRIBE, UNSUBSCRIBE, PING, and DISCONNECT commands.

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};

pub mod agent;
pub mod api;
pub mod client;
pub mod command;
mod connection_settings;
pub mod control_packet;
mod dispatch;
pub mod error;
pub mod interface;
pub mod mqtt_client;
mod pending_ack;
mod resume;
#[cfg(test)]
mod test_support;
pub mod topic;

#[macro_use]
extern crate derive_builder;
