// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common error and status types returned by the agent and its public API.

use thiserror::Error;

/// Error type surfaced by the underlying MQTT client/event loop.
pub type ConnectionError = rumqttc::ConnectionError;

/// Outcome of a dispatched command, delivered to its completion callback exactly once.
///
/// Deliberately coarse: callers that need the underlying transport error can still reach it
/// through [`Status::Client`].
#[derive(Debug, Clone, Error)]
pub enum Status {
    /// The command completed successfully.
    #[error("success")]
    Success,
    /// A required argument was missing or invalid.
    #[error("bad parameter")]
    BadParameter,
    /// The command pool or pending-acknowledgment table had no space for this command.
    #[error("insufficient resources to enqueue or track command")]
    NoMemory,
    /// The command could not be enqueued onto the agent's message interface.
    #[error("failed to send command to agent")]
    SendFailed,
    /// The agent terminated, or the session was deemed lost, before a pending acknowledgment
    /// could be collected.
    #[error("failed to receive expected acknowledgment")]
    RecvFailed,
    /// The broker returned a response that was not a well-formed acknowledgment of the request.
    #[error("malformed or unexpected broker response")]
    BadResponse,
    /// The broker refused the request (for example, a CONNACK or SUBACK failure code).
    #[error("server refused request")]
    ServerRefused,
    /// An error surfaced by the underlying MQTT client or event loop.
    #[error("client error: {0}")]
    Client(String),
}

impl Status {
    /// True if this status represents a completion and not a failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl From<ConnectionError> for Status {
    fn from(err: ConnectionError) -> Self {
        Status::Client(err.to_string())
    }
}
