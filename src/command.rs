// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Commands accepted by the agent's command loop, and the completion channel used to report
//! their outcome back to the caller that enqueued them.

use tokio::sync::oneshot;

use crate::control_packet::{ConnectInfo, PublishInfo, SubscribeTopicFilter};
use crate::error::Status;

/// Result of a dispatched command, delivered over a command's completion channel.
#[derive(Debug)]
pub struct CommandResult {
    /// The outcome of the command.
    pub status: Status,
    /// Whether the broker reported a pre-existing session for a CONNECT command.
    ///
    /// `None` for every command kind other than [`CommandKind::Connect`].
    pub session_present: Option<bool>,
    /// Per-filter subscribe acknowledgment codes for a SUBSCRIBE command.
    ///
    /// `None` for every command kind other than [`CommandKind::Subscribe`].
    pub reason_codes: Option<Vec<crate::control_packet::SubscribeReasonCode>>,
}

impl CommandResult {
    /// Build a bare result carrying only a [`Status`].
    #[must_use]
    pub fn from_status(status: Status) -> Self {
        Self {
            status,
            session_present: None,
            reason_codes: None,
        }
    }
}

/// The completion channel a command owns. Consumed exactly once by the agent: either when the
/// command's dispatch handler concludes without registering an acknowledgment, or later, when
/// the awaited acknowledgment (or a resumption/termination event) arrives.
pub type Completion = oneshot::Sender<CommandResult>;

/// Arguments accompanying a [`Command`], specific to its [`CommandKind`].
#[derive(Debug)]
pub enum CommandArgs {
    /// No arguments (PROCESS_LOOP, PING, DISCONNECT, TERMINATE).
    None,
    /// Arguments for a PUBLISH command.
    Publish(PublishInfo),
    /// Arguments for a SUBSCRIBE command.
    Subscribe(Vec<SubscribeTopicFilter>),
    /// Arguments for an UNSUBSCRIBE command.
    Unsubscribe(Vec<SubscribeTopicFilter>),
    /// Arguments for a CONNECT command.
    Connect(ConnectInfo),
}

/// The kind of operation a [`Command`] requests of the agent.
///
/// Ordering here has no significance; it exists purely to index the dispatch table in
/// [`crate::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Run one non-blocking pass of the MQTT client's network processing loop.
    ProcessLoop,
    /// Send a PUBLISH.
    Publish,
    /// Send a SUBSCRIBE.
    Subscribe,
    /// Send an UNSUBSCRIBE.
    Unsubscribe,
    /// Send a CONNECT, then resume (or clear) session state per the returned `session_present`.
    Connect,
    /// Send a DISCONNECT and end the command loop.
    Disconnect,
    /// Send a PINGREQ.
    Ping,
    /// Drain the command queue and pending-acknowledgment table, then end the command loop.
    Terminate,
}

/// A unit of work submitted to the agent's command loop.
///
/// Every `Command` carries exactly one [`Completion`] channel, which the agent guarantees to
/// consume exactly once: either immediately, if dispatch concludes without awaiting a broker
/// acknowledgment, or later, when that acknowledgment (or a resumption/termination event tied to
/// this command's packet id) arrives.
#[derive(Debug)]
pub struct Command {
    /// The kind of operation this command requests.
    pub kind: CommandKind,
    /// Arguments specific to `kind`.
    pub args: CommandArgs,
    /// Channel used to report this command's outcome back to its caller.
    pub completion: Completion,
}

impl Command {
    /// Construct a new command.
    #[must_use]
    pub fn new(kind: CommandKind, args: CommandArgs, completion: Completion) -> Self {
        Self {
            kind,
            args,
            completion,
        }
    }

    /// Consume this command, reporting `result` on its completion channel.
    ///
    /// A dropped receiver (the caller gave up waiting) is not an error here: the agent's
    /// obligation is only to send, not to be heard.
    pub fn complete(self, result: CommandResult) {
        let _ = self.completion.send(result);
    }
}

/// Flags a dispatch handler returns alongside a [`Status`] to tell the command loop what to do
/// next.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatchFlags {
    /// The command's packet id should be registered in the pending-acknowledgment table and its
    /// completion deferred until a matching acknowledgment, resume, or termination event occurs.
    pub add_acknowledgment: bool,
    /// Set by every handler that would need another zero-timeout drive of the process loop to
    /// observe the packet it just sent (matches the handler table's return tuple). `Agent::run`
    /// does not branch on it: its `tokio::select!` already polls the event loop continuously on
    /// every iteration, so the repeated zero-timeout drive this flag used to request is
    /// unconditionally subsumed by the loop's normal polling. Kept on the struct rather than
    /// dropped so a handler's return value still states it, even though the command loop has no
    /// separate action left to take in response.
    pub run_process_loop: bool,
    /// The command loop should end after this command is processed.
    pub end_loop: bool,
}
