// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-[`CommandKind`] dispatch handlers.
//!
//! Given a command's arguments and the MQTT client adapter, each handler performs the underlying
//! client call and reports back a [`Status`] plus the [`CommandDispatchFlags`] that tell the
//! command loop whether to register an acknowledgment or end the loop. `run_process_loop` is also
//! reported, matching the handler table's return shape, though `crate::agent::Agent::run` has no
//! separate drain step left to gate on it; see the note on the field.

use crate::command::{CommandArgs, CommandDispatchFlags, CommandKind};
use crate::control_packet::{ConnectReturnCode, PublishInfo};
use crate::error::Status;
use crate::mqtt_client::MqttOperations;

/// Outcome of dispatching one command to the underlying client.
pub struct DispatchOutcome {
    /// The result of the underlying client call.
    pub status: Status,
    /// What the command loop should do next.
    pub flags: CommandDispatchFlags,
    /// Packet id assigned to the request, if any acknowledgment is expected.
    pub packet_id: Option<u16>,
    /// For a QoS > 0 PUBLISH, the publish contents, retained for resend on session resumption.
    pub resend_publish: Option<PublishInfo>,
}

impl DispatchOutcome {
    fn bare(status: Status, flags: CommandDispatchFlags) -> Self {
        Self {
            status,
            flags,
            packet_id: None,
            resend_publish: None,
        }
    }
}

/// Dispatch `args` (of kind `kind`) against `client`.
pub async fn dispatch<C: MqttOperations>(
    kind: CommandKind,
    args: &CommandArgs,
    client: &C,
) -> DispatchOutcome {
    match (kind, args) {
        (CommandKind::ProcessLoop, _) => process_loop(),
        (CommandKind::Publish, CommandArgs::Publish(info)) => publish(client, info).await,
        (CommandKind::Subscribe, CommandArgs::Subscribe(filters)) => {
            subscribe(client, filters).await
        }
        (CommandKind::Unsubscribe, CommandArgs::Unsubscribe(filters)) => {
            unsubscribe(client, filters).await
        }
        (CommandKind::Connect, CommandArgs::Connect(_)) => connect(client).await,
        (CommandKind::Disconnect, _) => disconnect(client).await,
        (CommandKind::Ping, _) => ping(client).await,
        (CommandKind::Terminate, _) => terminate(),
        // A mismatch between kind and args can only happen if a caller constructs a Command by
        // hand rather than through the public API's kind-specific constructors.
        _ => DispatchOutcome::bare(Status::BadParameter, CommandDispatchFlags::default()),
    }
}

/// No underlying call. Exists so a producer with nothing specific to send can still wake the
/// agent: the event loop is already polled on every iteration of `Agent::run`'s `select!`, so
/// this command completes immediately rather than triggering any extra drain.
fn process_loop() -> DispatchOutcome {
    DispatchOutcome::bare(
        Status::Success,
        CommandDispatchFlags {
            add_acknowledgment: false,
            run_process_loop: true,
            end_loop: false,
        },
    )
}

/// Packet id (and therefore an acknowledgment) is only assigned for QoS > 0; a QoS 0 publish
/// concludes immediately with no pending acknowledgment.
async fn publish<C: MqttOperations>(client: &C, info: &PublishInfo) -> DispatchOutcome {
    match client.publish(info).await {
        Ok(Some(packet_id)) => DispatchOutcome {
            status: Status::Success,
            flags: CommandDispatchFlags {
                add_acknowledgment: true,
                run_process_loop: true,
                end_loop: false,
            },
            packet_id: Some(packet_id),
            resend_publish: Some(info.clone()),
        },
        Ok(None) => DispatchOutcome::bare(
            Status::Success,
            CommandDispatchFlags {
                add_acknowledgment: false,
                run_process_loop: true,
                end_loop: false,
            },
        ),
        Err(err) => DispatchOutcome::bare(
            Status::from(err),
            CommandDispatchFlags {
                add_acknowledgment: false,
                run_process_loop: true,
                end_loop: false,
            },
        ),
    }
}

/// Always assigns a packet id; an acknowledgment is only awaited if the request was actually
/// sent successfully.
async fn subscribe<C: MqttOperations>(
    client: &C,
    filters: &[crate::control_packet::SubscribeTopicFilter],
) -> DispatchOutcome {
    match client.subscribe(filters).await {
        Ok(packet_id) => DispatchOutcome {
            status: Status::Success,
            flags: CommandDispatchFlags {
                add_acknowledgment: true,
                run_process_loop: true,
                end_loop: false,
            },
            packet_id: Some(packet_id),
            resend_publish: None,
        },
        Err(err) => DispatchOutcome::bare(
            Status::from(err),
            CommandDispatchFlags {
                add_acknowledgment: false,
                run_process_loop: true,
                end_loop: false,
            },
        ),
    }
}

/// Same shape as subscribe.
async fn unsubscribe<C: MqttOperations>(
    client: &C,
    filters: &[crate::control_packet::SubscribeTopicFilter],
) -> DispatchOutcome {
    match client.unsubscribe(filters).await {
        Ok(packet_id) => DispatchOutcome {
            status: Status::Success,
            flags: CommandDispatchFlags {
                add_acknowledgment: true,
                run_process_loop: true,
                end_loop: false,
            },
            packet_id: Some(packet_id),
            resend_publish: None,
        },
        Err(err) => DispatchOutcome::bare(
            Status::from(err),
            CommandDispatchFlags {
                add_acknowledgment: false,
                run_process_loop: true,
                end_loop: false,
            },
        ),
    }
}

/// `run_process_loop` is reset to `false` unconditionally, regardless of the result: a CONNECT
/// command's dispatch always concludes immediately; the CONNACK it is actually waiting on
/// surfaces later as an incoming event, correlated back to this command by
/// `crate::agent::Agent::handle_connack` rather than returned directly by this handler (see the
/// note on `MqttClientAdapter::connect`).
async fn connect<C: MqttOperations>(client: &C) -> DispatchOutcome {
    let flags = CommandDispatchFlags {
        add_acknowledgment: false,
        run_process_loop: false,
        end_loop: false,
    };
    match client.connect().await {
        Ok(()) => DispatchOutcome::bare(Status::Success, flags),
        Err(err) => DispatchOutcome::bare(Status::from(err), flags),
    }
}

/// Ends the command loop unconditionally, regardless of whether the DISCONNECT send itself
/// succeeded.
async fn disconnect<C: MqttOperations>(client: &C) -> DispatchOutcome {
    let flags = CommandDispatchFlags {
        add_acknowledgment: false,
        run_process_loop: false,
        end_loop: true,
    };
    match client.disconnect().await {
        Ok(()) => DispatchOutcome::bare(Status::Success, flags),
        Err(err) => DispatchOutcome::bare(Status::from(err), flags),
    }
}

async fn ping<C: MqttOperations>(client: &C) -> DispatchOutcome {
    let flags = CommandDispatchFlags {
        add_acknowledgment: false,
        run_process_loop: true,
        end_loop: false,
    };
    match client.ping().await {
        Ok(()) => DispatchOutcome::bare(Status::Success, flags),
        Err(err) => DispatchOutcome::bare(Status::from(err), flags),
    }
}

/// The bulk of termination (draining the queue and the pending-acknowledgment table) is driven
/// by the command loop itself once it observes `end_loop`, since both of those structures live
/// with the loop, not with this dispatch function.
fn terminate() -> DispatchOutcome {
    DispatchOutcome::bare(
        Status::Success,
        CommandDispatchFlags {
            add_acknowledgment: false,
            run_process_loop: false,
            end_loop: true,
        },
    )
}

pub(crate) fn reason_code_ok(code: ConnectReturnCode) -> bool {
    matches!(code, ConnectReturnCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_packet::{QoS, SubscribeTopicFilter};
    use crate::error::ConnectionError;
    use crate::test_support::MockOperations;
    use crate::topic::TopicFilter;
    use std::str::FromStr;

    #[tokio::test]
    async fn qos0_publish_assigns_no_packet_id_and_needs_no_ack() {
        let client = MockOperations::new();
        let info = PublishInfo::new("t/a", QoS::AtMostOnce, false, "x");
        let outcome = publish(&client, &info).await;
        assert!(outcome.status.is_success());
        assert!(!outcome.flags.add_acknowledgment);
        assert!(outcome.packet_id.is_none());
    }

    #[tokio::test]
    async fn qos1_publish_assigns_packet_id_and_needs_ack() {
        let client = MockOperations::new();
        let info = PublishInfo::new("t/b", QoS::AtLeastOnce, false, "x");
        let outcome = publish(&client, &info).await;
        assert!(outcome.status.is_success());
        assert!(outcome.flags.add_acknowledgment);
        assert_eq!(outcome.packet_id, Some(1));
        assert!(outcome.resend_publish.is_some());
    }

    #[tokio::test]
    async fn publish_failure_never_parks_an_acknowledgment() {
        let client = MockOperations::new();
        client.fail_next_publish(ConnectionError::RequestsDone);
        let info = PublishInfo::new("t/c", QoS::AtLeastOnce, false, "x");
        let outcome = publish(&client, &info).await;
        assert!(!outcome.status.is_success());
        assert!(!outcome.flags.add_acknowledgment);
    }

    #[tokio::test]
    async fn subscribe_assigns_packet_id_and_needs_ack() {
        let client = MockOperations::new();
        let filters = vec![SubscribeTopicFilter {
            filter: TopicFilter::from_str("a/b").unwrap(),
            qos: QoS::AtLeastOnce,
        }];
        let outcome = subscribe(&client, &filters).await;
        assert!(outcome.status.is_success());
        assert!(outcome.flags.add_acknowledgment);
        assert!(outcome.packet_id.is_some());
    }

    #[tokio::test]
    async fn disconnect_ends_loop_even_on_error() {
        let client = MockOperations::new();
        client.fail_next_disconnect(ConnectionError::RequestsDone);
        let outcome = disconnect(&client).await;
        assert!(!outcome.status.is_success());
        assert!(outcome.flags.end_loop);
    }

    #[tokio::test]
    async fn terminate_sets_end_loop_with_no_client_call() {
        let outcome = terminate();
        assert!(outcome.status.is_success());
        assert!(outcome.flags.end_loop);
    }

    #[tokio::test]
    async fn process_loop_succeeds_immediately_with_no_client_call() {
        let outcome = process_loop();
        assert!(outcome.status.is_success());
        assert!(outcome.flags.run_process_loop);
        assert!(!outcome.flags.add_acknowledgment);
    }
}
