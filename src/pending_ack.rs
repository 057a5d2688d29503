// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fixed-capacity table tracking commands awaiting a broker acknowledgment.
//!
//! A small, statically-sized table indexed by linear scan rather than a hash map: a `HashMap<u16,
//! _>` would be wasted complexity here, since the fixed capacity (not lookup speed) is the
//! property callers depend on. A full table is how the agent signals `NoMemory` to a caller's
//! SUBSCRIBE, UNSUBSCRIBE, or QoS>0 PUBLISH.

use crate::command::{Command, CommandKind};
use crate::control_packet::PublishInfo;

/// A command that has been dispatched to the broker and is awaiting its acknowledgment.
pub struct PendingAck {
    /// Packet id assigned to the outbound request.
    pub packet_id: u16,
    /// The kind of command this acknowledgment corresponds to, used to decide how to interpret
    /// the incoming packet that eventually correlates to this entry.
    pub kind: CommandKind,
    /// The original command, retained so its completion channel can be used once an
    /// acknowledgment (or resumption/termination event) is ready to report on it.
    pub command: Command,
    /// For QoS>0 PUBLISH commands, the publish contents, retained so the packet can be resent
    /// with `dup` set if the session is resumed after a reconnect.
    pub publish: Option<PublishInfo>,
}

/// Table of commands awaiting a broker acknowledgment, indexed by MQTT packet id.
///
/// Capacity is fixed at construction. [`PendingAckTable::space_available`] lets dispatch handlers
/// perform a best-effort occupancy check before sending a request that will require an
/// acknowledgment.
pub struct PendingAckTable {
    slots: Vec<Option<PendingAck>>,
}

impl PendingAckTable {
    /// Create a table with room for `capacity` concurrently outstanding acknowledgments.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Number of unoccupied slots.
    #[must_use]
    pub fn space_available(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// True if at least one slot is free.
    ///
    /// This is a best-effort check: a command constructed based on a `true` result here can
    /// still observe `NoMemory` at dispatch time if another command claims the last slot first,
    /// since occupancy checks and insertion are not a single atomic step.
    #[must_use]
    pub fn has_space(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Register `entry` under its packet id.
    ///
    /// # Errors
    /// Returns the entry back to the caller, unregistered, if the table has no free slot or the
    /// packet id is already in use (a packet id of 0 is never valid and is rejected by callers
    /// before this point).
    pub fn insert(&mut self, entry: PendingAck) -> Result<(), PendingAck> {
        if self
            .slots
            .iter()
            .flatten()
            .any(|e| e.packet_id == entry.packet_id)
        {
            return Err(entry);
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            None => Err(entry),
        }
    }

    /// Remove and return the entry registered under `packet_id`, if any.
    ///
    /// Used to correlate an incoming PUBACK/PUBCOMP/SUBACK/UNSUBACK to the command that is
    /// awaiting it. A packet id of 0 never correlates to anything, treated as a malformed
    /// response.
    pub fn take(&mut self, packet_id: u16) -> Option<PendingAck> {
        if packet_id == 0 {
            return None;
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(e) if e.packet_id == packet_id))?;
        slot.take()
    }

    /// Iterate over occupied entries without removing them, in table order.
    ///
    /// Used by session resumption to locate every outstanding QoS>0 PUBLISH that must be resent
    /// with `dup` set, without disturbing entries for other command kinds (SUBSCRIBE/UNSUBSCRIBE
    /// acknowledgments have no resend counterpart and stay registered across a reconnect).
    pub fn iter(&self) -> impl Iterator<Item = &PendingAck> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Remove and return every occupied entry, leaving the table empty.
    ///
    /// Used when a reconnect reports no prior session: every outstanding command is unrecoverable
    /// and must be concluded as failed.
    pub fn drain_all(&mut self) -> Vec<PendingAck> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_packet::QoS;
    use tokio::sync::oneshot;

    fn dummy_command(kind: CommandKind) -> (Command, oneshot::Receiver<crate::command::CommandResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Command::new(kind, crate::command::CommandArgs::None, tx),
            rx,
        )
    }

    #[test]
    fn insert_and_take_roundtrip() {
        let mut table = PendingAckTable::new(2);
        let (command, _rx) = dummy_command(CommandKind::Publish);
        table
            .insert(PendingAck {
                packet_id: 7,
                kind: CommandKind::Publish,
                command,
                publish: Some(PublishInfo::new("a/b", QoS::AtLeastOnce, false, "hi")),
            })
            .unwrap();
        assert_eq!(table.space_available(), 1);
        let entry = table.take(7).expect("entry should be present");
        assert_eq!(entry.packet_id, 7);
        assert!(table.take(7).is_none());
        assert_eq!(table.space_available(), 2);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut table = PendingAckTable::new(1);
        let (c1, _r1) = dummy_command(CommandKind::Subscribe);
        table
            .insert(PendingAck {
                packet_id: 1,
                kind: CommandKind::Subscribe,
                command: c1,
                publish: None,
            })
            .unwrap();
        assert!(!table.has_space());
        let (c2, _r2) = dummy_command(CommandKind::Subscribe);
        let rejected = table.insert(PendingAck {
            packet_id: 2,
            kind: CommandKind::Subscribe,
            command: c2,
            publish: None,
        });
        assert!(rejected.is_err());
    }

    #[test]
    fn take_with_zero_packet_id_never_matches() {
        let mut table = PendingAckTable::new(1);
        assert!(table.take(0).is_none());
    }

    #[test]
    fn drain_all_empties_table() {
        let mut table = PendingAckTable::new(2);
        let (c1, _r1) = dummy_command(CommandKind::Publish);
        let (c2, _r2) = dummy_command(CommandKind::Subscribe);
        table
            .insert(PendingAck {
                packet_id: 1,
                kind: CommandKind::Publish,
                command: c1,
                publish: None,
            })
            .unwrap();
        table
            .insert(PendingAck {
                packet_id: 2,
                kind: CommandKind::Subscribe,
                command: c2,
                publish: None,
            })
            .unwrap();
        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(table.space_available(), 2);
    }
}
