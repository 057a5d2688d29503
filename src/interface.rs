// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The message interface connecting command producers to the agent's command loop.
//!
//! Two ordinary Rust types built on `tokio::sync` primitives: a [`CommandPool`] bounding how many
//! commands may be outstanding at once, and a command channel (see [`command_channel`]) carrying
//! dispatched commands from producers to the agent. Both are `Clone`-able handles over shared
//! state, so producers on any number of tasks can hold one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::command::Command;

/// A reservation against a [`CommandPool`]'s capacity.
///
/// Holding a permit is proof that the pool had room for one more outstanding command at the time
/// it was acquired. Dropping the permit returns the slot to the pool; the release is unconditional
/// and cannot be forgotten, because it rides on `Drop` rather than requiring every caller to
/// remember to invoke it.
pub type CommandPermit = OwnedSemaphorePermit;

/// Bounds the number of commands that may be outstanding (enqueued, or dispatched and awaiting
/// acknowledgment) at any one time.
///
/// Acquiring a permit is the only way to obtain a slot; once every slot is taken, further
/// acquisitions fail until an outstanding command completes and releases its permit.
#[derive(Clone)]
pub struct CommandPool {
    semaphore: Arc<Semaphore>,
}

impl CommandPool {
    /// Create a pool with room for `capacity` outstanding commands.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Attempt to reserve a slot without waiting.
    ///
    /// Returns `None` immediately if the pool is exhausted rather than blocking the caller.
    #[must_use]
    pub fn try_get_command(&self) -> Option<CommandPermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn space_available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Error returned when a command cannot be handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The channel's bounded capacity was exhausted and the wait timed out.
    #[error("timed out waiting for room in the command channel")]
    Timeout,
    /// The agent's command loop has exited; there is no receiver left to deliver to.
    #[error("agent is no longer accepting commands")]
    Closed,
}

/// The producer-facing half of the command channel.
///
/// Enqueues a command for the agent's command loop to pick up, blocking the caller (up to a
/// timeout) if the channel is momentarily full rather than failing immediately, since a full
/// channel is expected to drain quickly under normal operation.
#[derive(Clone)]
pub struct CommandSender {
    inner: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Enqueue `command`, waiting up to `timeout` for room if the channel is full.
    ///
    /// # Errors
    /// Returns [`SendError::Timeout`] if no room became available within `timeout`, or
    /// [`SendError::Closed`] if the agent has already shut down its command loop.
    pub async fn send(&self, command: Command, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.inner.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

/// The agent-facing half of the command channel.
///
/// The agent's command loop polls it, with a timeout, on every iteration.
pub struct CommandReceiver {
    inner: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Wait up to `timeout` for the next command.
    ///
    /// Returns `None` if the wait times out (the loop should then run its idle housekeeping and
    /// poll again) or if every [`CommandSender`] has been dropped.
    pub async fn recv(&mut self, timeout: Duration) -> Option<Command> {
        tokio::time::timeout(timeout, self.inner.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain every command currently buffered in the channel without waiting, for use during
    /// termination.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut drained = Vec::new();
        while let Ok(command) = self.inner.try_recv() {
            drained.push(command);
        }
        drained
    }
}

/// Construct a bounded command channel with the given capacity.
#[must_use]
pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandSender { inner: tx }, CommandReceiver { inner: rx })
}

/// A best-effort, shared view of how many pending-acknowledgment slots are free.
///
/// Deliberately racy: producers read it without synchronizing against the agent task that
/// actually owns the table. A stale "space available" reading here is not a correctness bug: the
/// agent's own reservation at dispatch time is authoritative and can still fail with
/// [`crate::error::Status::NoMemory`] even after this check passed; this hint only lets the
/// public API reject the common case (the table is visibly full) before bothering to enqueue a
/// command that the agent would just reject anyway.
#[derive(Clone)]
pub struct AckSpaceHint {
    available: Arc<AtomicUsize>,
}

impl AckSpaceHint {
    /// Create a hint initialized to `capacity` free slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Arc::new(AtomicUsize::new(capacity)),
        }
    }

    /// Best-effort count of free slots as of the last update.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    /// Overwrite the hint with the table's actual occupancy, called by the agent after every
    /// insert, take, or drain.
    pub fn update(&self, available: usize) {
        self.available.store(available, Ordering::Relaxed);
    }
}
