// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The agent's command loop: the single task that owns the MQTT client and event loop, and the
//! only place in this crate that ever touches either of them.
//!
//! At its core this is a `tokio::select!` over "the next thing to do is either handle an incoming
//! network event, or handle the next enqueued command", run until a DISCONNECT or TERMINATE
//! command ends it. Incoming broker acknowledgments correlate against a fixed-capacity
//! [`PendingAckTable`] and commands dispatch through a per-kind handler in [`crate::dispatch`].
//!
//! [`Agent`] is generic over [`MqttOperations`]/[`MqttEventLoop`] so it can be driven in tests
//! against an injected fake rather than a live broker connection.

use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandArgs, CommandKind, CommandResult};
use crate::control_packet::PublishInfo;
use crate::dispatch::{self, DispatchOutcome};
use crate::error::Status;
use crate::interface::{AckSpaceHint, CommandReceiver};
use crate::mqtt_client::{MqttEventLoop, MqttOperations, PolledEvent};
use crate::pending_ack::{PendingAck, PendingAckTable};
use crate::resume;

/// How long the command loop waits for the next enqueued command before looping back around to
/// re-poll the event loop: short enough that a stalled queue never starves the network side of
/// the loop.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The running agent: owns the MQTT client/event loop pair and the tables tracking in-flight
/// work. Constructed once per connection and consumed by [`Agent::run`].
pub struct Agent<C: MqttOperations, E: MqttEventLoop> {
    client: C,
    event_loop: E,
    command_rx: CommandReceiver,
    pending_acks: PendingAckTable,
    ack_space_hint: AckSpaceHint,
    incoming_publish: Option<UnboundedSender<PublishInfo>>,
    /// The CONNECT command currently awaiting its CONNACK, if any. A CONNECT's dispatch handler
    /// concludes immediately (see `crate::dispatch::connect`), but its completion is deferred
    /// until the matching CONNACK surfaces through the event loop, so that `session_present` can
    /// be reported back to the caller and session resumption can run before the caller is told
    /// the connect attempt is done.
    pending_connect: Option<Command>,
    /// When the CONNACK for `pending_connect` is due, honoring that command's `ConnectInfo`'s
    /// `connack_timeout` (spec §5: "CONNACK timeout is carried inside the Connect args and
    /// honored by the underlying MQTT client"). `rumqttc` itself has no per-call CONNACK timeout
    /// to delegate to (see `MqttClientAdapter::connect`), so the agent enforces it directly:
    /// `None` whenever no CONNECT is outstanding.
    connect_deadline: Option<Instant>,
    /// An external shutdown signal, distinct from a `Terminate` command: cancelling it ends the
    /// command loop the same way `Terminate` does (draining the queue and the
    /// pending-acknowledgment table) without a producer needing a handle to submit commands
    /// through. Used by process-level supervision (see `crate::client`) rather than by any
    /// command in the taxonomy.
    cancel_token: CancellationToken,
}

impl<C: MqttOperations, E: MqttEventLoop> Agent<C, E> {
    /// Construct a new agent.
    ///
    /// `pending_ack_capacity` bounds how many commands may simultaneously await a broker
    /// acknowledgment. `ack_space_hint` is shared with the [`crate::api::AgentClient`] that enqueues commands for
    /// this agent, so its best-effort pre-enqueue space check stays roughly in sync with the
    /// table this agent actually owns.
    #[must_use]
    pub fn new(
        client: C,
        event_loop: E,
        command_rx: CommandReceiver,
        pending_ack_capacity: usize,
        ack_space_hint: AckSpaceHint,
        incoming_publish: Option<UnboundedSender<PublishInfo>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            event_loop,
            command_rx,
            pending_acks: PendingAckTable::new(pending_ack_capacity),
            ack_space_hint,
            incoming_publish,
            pending_connect: None,
            connect_deadline: None,
            cancel_token,
        }
    }

    /// Number of pending-acknowledgment slots currently free.
    #[must_use]
    pub fn pending_ack_space_available(&self) -> usize {
        self.pending_acks.space_available()
    }

    fn sync_ack_space_hint(&self) {
        self.ack_space_hint
            .update(self.pending_acks.space_available());
    }

    /// Run the command loop until a DISCONNECT or TERMINATE command ends it, or the event loop
    /// reports a fatal connection error.
    ///
    /// # Errors
    /// Returns the underlying connection error if the event loop fails in a way that is not a
    /// normal, command-initiated disconnect.
    pub async fn run(mut self) -> Result<(), Status> {
        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    self.terminate();
                    return Ok(());
                }

                command = self.command_rx.recv(COMMAND_POLL_INTERVAL) => {
                    let Some(command) = command else {
                        continue;
                    };
                    if self.handle_command(command).await {
                        self.terminate();
                        return Ok(());
                    }
                }

                polled = self.event_loop.poll() => {
                    match polled {
                        Ok(event) => self.handle_event(event).await,
                        Err(err) => {
                            error!("event loop error: {err}");
                            self.terminate();
                            return Err(Status::from(err));
                        }
                    }
                }

                () = Self::wait_for_connect_deadline(self.connect_deadline) => {
                    self.fail_connect_timeout();
                }
            }
        }
    }

    /// Resolves when `deadline` elapses, or never if no CONNECT is outstanding.
    async fn wait_for_connect_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(instant) => tokio::time::sleep_until(instant).await,
            None => std::future::pending().await,
        }
    }

    /// Fails `pending_connect` with `RecvFailed` once its CONNACK has not arrived within
    /// `ConnectInfo::connack_timeout`.
    fn fail_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if let Some(command) = self.pending_connect.take() {
            warn!("CONNACK not received within connack_timeout, failing CONNECT");
            command.complete(CommandResult::from_status(Status::RecvFailed));
        }
    }

    /// Dispatch one command. Returns `true` if the command loop should end.
    async fn handle_command(&mut self, command: Command) -> bool {
        let kind = command.kind;
        let DispatchOutcome {
            status,
            flags,
            packet_id,
            resend_publish,
        } = dispatch::dispatch(kind, &command.args, &self.client).await;

        if kind == CommandKind::Connect && status.is_success() {
            // Deferred: completed from `handle_connack` once the CONNACK this command is
            // waiting on actually arrives. See the note on `pending_connect`.
            if let CommandArgs::Connect(info) = &command.args {
                self.connect_deadline = Some(Instant::now() + info.connack_timeout);
            }
            self.pending_connect = Some(command);
        } else if flags.add_acknowledgment {
            let Some(packet_id) = packet_id else {
                // A handler asked for an acknowledgment without assigning a packet id: treat
                // this as a malformed response, an internal invariant violation with no
                // graceful recovery.
                command.complete(CommandResult::from_status(Status::BadResponse));
                return flags.end_loop;
            };
            let entry = PendingAck {
                packet_id,
                kind,
                command,
                publish: resend_publish,
            };
            if let Err(PendingAck { command, .. }) = self.pending_acks.insert(entry) {
                // The underlying send already succeeded, but the caller has no way to observe
                // the eventual acknowledgment once the slot could not be reserved for it, so the
                // command is reported as out of resources anyway.
                command.complete(CommandResult::from_status(Status::NoMemory));
            }
            self.sync_ack_space_hint();
        } else {
            command.complete(CommandResult::from_status(status));
        }

        flags.end_loop
    }

    async fn handle_event(&mut self, event: PolledEvent) {
        match event {
            PolledEvent::ConnAck {
                session_present,
                return_code,
            } => self.handle_connack(session_present, return_code).await,
            PolledEvent::PubAck { packet_id } | PolledEvent::PubComp { packet_id } => {
                self.conclude_ack(packet_id, None);
            }
            PolledEvent::SubAck {
                packet_id,
                reason_codes,
            } => {
                self.conclude_ack(packet_id, Some(reason_codes));
            }
            PolledEvent::UnsubAck { packet_id } => {
                self.conclude_ack(packet_id, None);
            }
            PolledEvent::PingResp => {
                debug!("received PINGRESP");
            }
            PolledEvent::Publish(publish) => {
                if let Some(sink) = &self.incoming_publish {
                    if sink.send(publish).is_err() {
                        warn!("incoming publish dropped: no receiver listening");
                    }
                }
            }
            PolledEvent::Other => {}
        }
    }

    /// Runs the full session-resumption policy on every CONNACK, then completes the
    /// CONNECT command that was awaiting it, if any is parked in `pending_connect`.
    ///
    /// There is no special case for "the very first CONNECT in this agent's lifetime": the
    /// pending-acknowledgment table is empty at that point by construction, so running the same
    /// resend-or-clear policy unconditionally is a no-op on a fresh agent, and the real policy on
    /// every reconnect (one code path rather than two).
    async fn handle_connack(
        &mut self,
        session_present: bool,
        return_code: crate::control_packet::ConnectReturnCode,
    ) {
        self.connect_deadline = None;

        if !dispatch::reason_code_ok(return_code) {
            warn!("broker refused connection: {return_code:?}");
            resume::clear_pending_acknowledgments(&mut self.pending_acks);
            self.sync_ack_space_hint();
            if let Some(command) = self.pending_connect.take() {
                command.complete(CommandResult::from_status(Status::ServerRefused));
            }
            return;
        }

        if session_present {
            if let Err(err) = resume::resend_publishes(&mut self.pending_acks, &self.client).await
            {
                // Deliberately does not clear the pending-acknowledgment table here: a failed
                // resend leaves the affected entries exactly as they were, still awaiting their
                // original acknowledgment, rather than silently discarding state there is no
                // basis to declare unrecoverable. Per the open question in the design notes, the
                // pending CONNECT command is still completed with the `session_present` the
                // broker actually reported: only the replay of in-flight publishes failed, not
                // the connect itself.
                error!("failed to resend publishes on session resumption: {err}");
            }
        } else {
            resume::clear_pending_acknowledgments(&mut self.pending_acks);
            self.sync_ack_space_hint();
        }

        if let Some(command) = self.pending_connect.take() {
            command.complete(CommandResult {
                status: Status::Success,
                session_present: Some(session_present),
                reason_codes: None,
            });
        }
    }

    fn conclude_ack(
        &mut self,
        packet_id: u16,
        reason_codes: Option<Vec<crate::control_packet::SubscribeReasonCode>>,
    ) {
        let Some(entry) = self.pending_acks.take(packet_id) else {
            warn!("no pending command found for packet id {packet_id}");
            return;
        };
        self.sync_ack_space_hint();
        entry.command.complete(CommandResult {
            status: Status::Success,
            session_present: None,
            reason_codes,
        });
    }

    /// Drain every command still buffered in the channel, and every outstanding acknowledgment,
    /// failing each with `BadResponse` (distinct from
    /// [`resume::clear_pending_acknowledgments`]'s `RecvFailed`, which is reserved for session
    /// loss specifically, not for an orderly shutdown).
    fn terminate(&mut self) {
        for command in self.command_rx.drain() {
            command.complete(CommandResult::from_status(Status::BadResponse));
        }
        for entry in self.pending_acks.drain_all() {
            entry
                .command
                .complete(CommandResult::from_status(Status::BadResponse));
        }
        self.sync_ack_space_hint();
        self.connect_deadline = None;
        if let Some(command) = self.pending_connect.take() {
            command.complete(CommandResult::from_status(Status::BadResponse));
        }
    }
}
