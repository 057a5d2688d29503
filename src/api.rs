// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The public, thread-safe entry point onto the agent.
//!
//! Each method here follows the same shape: validate the caller's arguments, reserve a slot in
//! the command pool, enqueue a [`Command`], and await its completion. Any
//! number of clones of [`AgentClient`] may call these concurrently from any task or thread: the
//! agent task reading the other end of the channel is the only thing that ever touches the
//! non-thread-safe MQTT client.

use std::time::Duration;

use bytes::Bytes;

use crate::command::{Command, CommandArgs, CommandKind, CommandResult};
use crate::control_packet::{ConnectInfo, PublishInfo, QoS, SubscribeTopicFilter};
use crate::error::Status;
use crate::interface::{AckSpaceHint, CommandPool, CommandSender, SendError};
use crate::topic::{TopicFilter, TopicName};

/// How long a public API call will wait for room in the command channel before giving up.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default network buffer size assumed for the publish fixed-header bound check.
pub const DEFAULT_NETWORK_BUFFER_SIZE: usize = 5000;

/// A cloneable, thread-safe handle for submitting commands to a running [`crate::agent::Agent`].
#[derive(Clone)]
pub struct AgentClient {
    pool: CommandPool,
    sender: CommandSender,
    send_timeout: Duration,
    ack_space_hint: AckSpaceHint,
    network_buffer_size: usize,
}

impl AgentClient {
    /// Construct a new client over the given command pool and channel.
    ///
    /// `ack_space_hint` should be the same [`AckSpaceHint`] given to the [`crate::agent::Agent`]
    /// this client's commands are ultimately dispatched to, so the best-effort pre-enqueue check
    /// in [`AgentClient::submit`] reflects that agent's actual pending-acknowledgment occupancy.
    #[must_use]
    pub fn new(pool: CommandPool, sender: CommandSender, ack_space_hint: AckSpaceHint) -> Self {
        Self {
            pool,
            sender,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            ack_space_hint,
            network_buffer_size: DEFAULT_NETWORK_BUFFER_SIZE,
        }
    }

    /// Override the default timeout waiting for room in the command channel.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Override the network buffer size a PUBLISH's fixed header is checked against.
    #[must_use]
    pub fn with_network_buffer_size(mut self, network_buffer_size: usize) -> Self {
        self.network_buffer_size = network_buffer_size;
        self
    }

    /// Request the agent run one non-blocking pass of the network processing loop.
    ///
    /// # Errors
    /// See [`AgentClient::submit`].
    pub async fn process_loop(&self) -> Result<CommandResult, Status> {
        self.submit(CommandKind::ProcessLoop, CommandArgs::None).await
    }

    /// Publish `payload` to `topic` at the given QoS.
    ///
    /// # Errors
    /// Returns [`Status::BadParameter`] if `topic` is not a valid MQTT topic name, or if the
    /// fixed header (control byte, remaining-length byte, and 2-byte topic-length prefix) plus
    /// the topic name would not fit inside the configured network buffer. Returns
    /// [`Status::NoMemory`] if `qos` is greater than [`QoS::AtMostOnce`] and the
    /// pending-acknowledgment table has no visible free slot. See [`AgentClient::submit`] for
    /// the remaining error cases.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        qos: QoS,
        retain: bool,
        payload: impl Into<Bytes>,
    ) -> Result<CommandResult, Status> {
        let topic = topic.into();
        if TopicName::from_string(topic.clone()).is_err() {
            return Err(Status::BadParameter);
        }
        if topic.len() + PublishInfo::FIXED_HEADER_BYTES >= self.network_buffer_size {
            return Err(Status::BadParameter);
        }
        if qos != QoS::AtMostOnce {
            self.check_ack_space()?;
        }
        let info = PublishInfo::new(topic, qos, retain, payload);
        self.submit(CommandKind::Publish, CommandArgs::Publish(info))
            .await
    }

    /// Subscribe to one or more topic filters.
    ///
    /// # Errors
    /// Returns [`Status::BadParameter`] if `filters` is empty. Returns [`Status::NoMemory`] if
    /// the pending-acknowledgment table has no visible free slot. See [`AgentClient::submit`]
    /// for the remaining error cases.
    pub async fn subscribe(
        &self,
        filters: Vec<SubscribeTopicFilter>,
    ) -> Result<CommandResult, Status> {
        if filters.is_empty() {
            return Err(Status::BadParameter);
        }
        self.check_ack_space()?;
        self.submit(CommandKind::Subscribe, CommandArgs::Subscribe(filters))
            .await
    }

    /// Subscribe to a single topic filter string at the given QoS.
    ///
    /// # Errors
    /// Returns [`Status::BadParameter`] if `filter` is not a valid MQTT topic filter, or via
    /// [`AgentClient::subscribe`].
    pub async fn subscribe_one(
        &self,
        filter: impl Into<String>,
        qos: QoS,
    ) -> Result<CommandResult, Status> {
        let filter = TopicFilter::from_string(filter.into()).map_err(|_| Status::BadParameter)?;
        self.subscribe(vec![SubscribeTopicFilter { filter, qos }])
            .await
    }

    /// Unsubscribe from one or more topic filters.
    ///
    /// # Errors
    /// Returns [`Status::BadParameter`] if `filters` is empty. Returns [`Status::NoMemory`] if
    /// the pending-acknowledgment table has no visible free slot. See [`AgentClient::submit`]
    /// for the remaining error cases.
    pub async fn unsubscribe(
        &self,
        filters: Vec<SubscribeTopicFilter>,
    ) -> Result<CommandResult, Status> {
        if filters.is_empty() {
            return Err(Status::BadParameter);
        }
        self.check_ack_space()?;
        self.submit(CommandKind::Unsubscribe, CommandArgs::Unsubscribe(filters))
            .await
    }

    /// Connect (or reconnect) to the broker.
    ///
    /// # Errors
    /// See [`AgentClient::submit`].
    pub async fn connect(&self, info: ConnectInfo) -> Result<CommandResult, Status> {
        self.submit(CommandKind::Connect, CommandArgs::Connect(info))
            .await
    }

    /// Disconnect from the broker and end the agent's command loop.
    ///
    /// # Errors
    /// See [`AgentClient::submit`].
    pub async fn disconnect(&self) -> Result<CommandResult, Status> {
        self.submit(CommandKind::Disconnect, CommandArgs::None).await
    }

    /// Send a PINGREQ.
    ///
    /// # Errors
    /// See [`AgentClient::submit`].
    pub async fn ping(&self) -> Result<CommandResult, Status> {
        self.submit(CommandKind::Ping, CommandArgs::None).await
    }

    /// End the agent's command loop, failing every queued and outstanding command.
    ///
    /// # Errors
    /// See [`AgentClient::submit`].
    pub async fn terminate(&self) -> Result<CommandResult, Status> {
        self.submit(CommandKind::Terminate, CommandArgs::None).await
    }

    /// Best-effort pre-enqueue check against the agent's pending-acknowledgment occupancy.
    ///
    /// Deliberately racy: the hint may be stale by the time the agent actually dispatches this
    /// command, in which case the agent's own reservation is authoritative and fails the command
    /// with [`Status::NoMemory`] regardless of what this check found. This only short-circuits
    /// the common case of a visibly full table before a command is even enqueued.
    fn check_ack_space(&self) -> Result<(), Status> {
        if self.ack_space_hint.available() == 0 {
            return Err(Status::NoMemory);
        }
        Ok(())
    }

    /// Validate, enqueue, and await completion of a command.
    ///
    /// # Errors
    /// - [`Status::NoMemory`] if the command pool has no free slot.
    /// - [`Status::SendFailed`] if the command could not be enqueued within the send timeout, or
    ///   the agent has already shut down its command loop.
    /// - [`Status::RecvFailed`] if the agent task ended before reporting this command's outcome.
    async fn submit(&self, kind: CommandKind, args: CommandArgs) -> Result<CommandResult, Status> {
        let permit = self.pool.try_get_command().ok_or(Status::NoMemory)?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let command = Command::new(kind, args, tx);
        let result = match self.sender.send(command, self.send_timeout).await {
            Ok(()) => rx.await.map_err(|_| Status::RecvFailed),
            Err(SendError::Timeout) => Err(Status::SendFailed),
            Err(SendError::Closed) => Err(Status::SendFailed),
        };
        drop(permit);
        result
    }
}
