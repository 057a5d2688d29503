// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Session resumption policy, run once per CONNACK.
//!
//! When a CONNACK reports a pre-existing session, every outstanding QoS > 0 PUBLISH is resent
//! with `dup` set (its acknowledgment is still awaited from the same pending-acknowledgment table
//! entry; resending does not remove it); when the broker reports no prior session, nothing is
//! recoverable, so every outstanding command is concluded with [`Status::RecvFailed`] and the
//! table is emptied.

use log::{debug, warn};

use crate::command::{CommandKind, CommandResult};
use crate::error::{ConnectionError, Status};
use crate::mqtt_client::MqttOperations;
use crate::pending_ack::PendingAckTable;

/// Resend every outstanding QoS > 0 PUBLISH with `dup` set.
///
/// Entries are not removed from `table`: the broker is still expected to acknowledge the resent
/// packet, and the command loop's normal correlation path (an incoming PUBACK/PUBCOMP taking the
/// entry via its packet id) concludes it exactly as it would have the first time. If a resend
/// fails partway through, the remaining un-resent entries are left as-is and the error is
/// returned; they will be resent on the next successful resumption. Resending stops at the first
/// failure rather than unwinding what was already sent.
///
/// # Errors
/// Returns the first underlying client error encountered while resending.
pub async fn resend_publishes<C: MqttOperations>(
    table: &mut PendingAckTable,
    client: &C,
) -> Result<(), ConnectionError> {
    let packet_ids: Vec<u16> = table
        .iter()
        .filter(|entry| entry.kind == CommandKind::Publish && entry.publish.is_some())
        .map(|entry| entry.packet_id)
        .collect();

    for packet_id in packet_ids {
        let Some(entry) = table.iter().find(|e| e.packet_id == packet_id) else {
            continue;
        };
        let mut publish = entry
            .publish
            .clone()
            .expect("filtered on publish.is_some() above");
        publish.dup = true;
        debug!("resending publish with packet id {packet_id} (dup=true) on session resumption");
        client.resend_publish(&publish).await?;
    }
    Ok(())
}

/// Conclude every outstanding command with [`Status::RecvFailed`] and empty `table`.
///
/// Called when a CONNACK reports no pre-existing session: any PUBLISH, SUBSCRIBE, or
/// UNSUBSCRIBE the broker had not yet acknowledged before the disconnect is unrecoverable,
/// because whatever packet ids and partial QoS 2 handshakes the broker remembered were just
/// discarded along with the old session.
pub fn clear_pending_acknowledgments(table: &mut PendingAckTable) {
    for entry in table.drain_all() {
        warn!(
            "clearing pending acknowledgment for packet id {} ({:?}) after session loss",
            entry.packet_id, entry.kind
        );
        entry
            .command
            .complete(CommandResult::from_status(Status::RecvFailed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandArgs};
    use crate::control_packet::{PublishInfo, QoS};
    use crate::pending_ack::PendingAck;
    use crate::test_support::MockOperations;
    use tokio::sync::oneshot;

    fn parked_publish(
        packet_id: u16,
        topic: &str,
    ) -> (PendingAck, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        let command = Command::new(CommandKind::Publish, CommandArgs::None, tx);
        let entry = PendingAck {
            packet_id,
            kind: CommandKind::Publish,
            command,
            publish: Some(PublishInfo::new(topic, QoS::AtLeastOnce, false, "hi")),
        };
        (entry, rx)
    }

    #[tokio::test]
    async fn resend_publishes_sets_dup_and_leaves_table_entry_in_place() {
        let client = MockOperations::new();
        let mut table = PendingAckTable::new(4);
        let (entry, _rx) = parked_publish(11, "a/b");
        table.insert(entry).unwrap();

        resend_publishes(&mut table, &client).await.unwrap();

        let resent = client.resent_publishes();
        assert_eq!(resent.len(), 1);
        assert!(resent[0].dup);
        assert_eq!(table.space_available(), 3);
        assert!(table.iter().any(|e| e.packet_id == 11));
    }

    #[tokio::test]
    async fn resend_publishes_ignores_non_publish_entries() {
        let client = MockOperations::new();
        let mut table = PendingAckTable::new(4);
        let (tx, _rx) = oneshot::channel();
        table
            .insert(PendingAck {
                packet_id: 5,
                kind: CommandKind::Subscribe,
                command: Command::new(CommandKind::Subscribe, CommandArgs::None, tx),
                publish: None,
            })
            .unwrap();

        resend_publishes(&mut table, &client).await.unwrap();
        assert!(client.resent_publishes().is_empty());
    }

    #[test]
    fn clear_pending_acknowledgments_fails_every_entry_and_empties_table() {
        let mut table = PendingAckTable::new(2);
        let (entry, rx) = parked_publish(1, "a/b");
        table.insert(entry).unwrap();

        clear_pending_acknowledgments(&mut table);

        assert_eq!(table.space_available(), 2);
        let result = rx.blocking_recv().unwrap();
        assert!(matches!(result.status, Status::RecvFailed));
    }

    #[test]
    fn clear_pending_acknowledgments_is_idempotent_on_an_empty_table() {
        let mut table = PendingAckTable::new(2);
        clear_pending_acknowledgments(&mut table);
        clear_pending_acknowledgments(&mut table);
        assert_eq!(table.space_available(), 2);
    }
}
