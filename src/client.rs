// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Top-level construction: wires up the underlying `rumqttc` transport, spawns the agent's
//! command loop as its own task, and hands back the [`AgentClient`] producers use to submit
//! commands.
//!
//! Builds the `rumqttc` client and event loop together from [`MqttConnectionSettings`]. The
//! returned handle does not itself issue a CONNECT: call [`AgentClient::connect`] once it is in
//! hand.

use rumqttc::{AsyncClient, MqttOptions, TlsConfiguration, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::api::AgentClient;
use crate::connection_settings::MqttConnectionSettings;
use crate::control_packet::PublishInfo;
use crate::error::Status;
use crate::interface::{command_channel, AckSpaceHint, CommandPool};
use crate::mqtt_client::{MqttClientAdapter, MqttEventLoopAdapter};

/// Default number of commands that may be outstanding (enqueued, or dispatched and awaiting
/// acknowledgment) at once.
pub const DEFAULT_COMMAND_POOL_CAPACITY: usize = 32;

/// Default pending-acknowledgment table capacity.
pub const DEFAULT_PENDING_ACK_CAPACITY: usize = 20;

/// Default bounded capacity of the channel carrying commands from producers to the agent.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Everything [`spawn`] hands back: the handle producers submit commands through, the task
/// running the agent's command loop, and (if requested) the channel broker-originated PUBLISHes
/// arrive on.
pub struct AgentHandle {
    /// Thread-safe handle for submitting commands to the running agent.
    pub client: AgentClient,
    /// The agent's command loop task. Await this (or just hold onto it) after issuing a
    /// `disconnect` or `terminate` command through `client` to observe the loop's exit status.
    pub task: JoinHandle<Result<(), Status>>,
    /// Broker-originated PUBLISH packets, present only if `with_incoming_publish` was `true`.
    pub incoming_publish: Option<mpsc::UnboundedReceiver<PublishInfo>>,
    /// Cancel this to end the agent's command loop from outside the command interface (for
    /// example, in response to a process shutdown signal), without needing a handle able to
    /// submit a `Terminate` command. Has the same draining effect `Terminate` does.
    pub shutdown: CancellationToken,
}

/// Build the transport described by `settings` and spawn the agent's command loop, using the
/// default pool, table, and channel capacities.
#[must_use]
pub fn spawn(settings: &MqttConnectionSettings, with_incoming_publish: bool) -> AgentHandle {
    spawn_with_capacity(
        settings,
        DEFAULT_COMMAND_POOL_CAPACITY,
        DEFAULT_PENDING_ACK_CAPACITY,
        DEFAULT_COMMAND_CHANNEL_CAPACITY,
        with_incoming_publish,
    )
}

/// As [`spawn`], with explicit capacities for the command pool, the pending-acknowledgment
/// table, and the command channel.
#[must_use]
pub fn spawn_with_capacity(
    settings: &MqttConnectionSettings,
    command_pool_capacity: usize,
    pending_ack_capacity: usize,
    command_channel_capacity: usize,
    with_incoming_publish: bool,
) -> AgentHandle {
    let options = mqtt_options(settings);
    let (async_client, event_loop) = AsyncClient::new(options, command_channel_capacity);

    let (command_tx, command_rx) = command_channel(command_channel_capacity);
    let pool = CommandPool::new(command_pool_capacity);
    let ack_space_hint = AckSpaceHint::new(pending_ack_capacity);

    let (incoming_tx, incoming_publish) = if with_incoming_publish {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let shutdown = CancellationToken::new();
    let agent = Agent::new(
        MqttClientAdapter::new(async_client),
        MqttEventLoopAdapter::new(event_loop),
        command_rx,
        pending_ack_capacity,
        ack_space_hint.clone(),
        incoming_tx,
        shutdown.clone(),
    );
    let task = tokio::spawn(agent.run());

    let client = AgentClient::new(pool, command_tx, ack_space_hint);

    AgentHandle {
        client,
        task,
        incoming_publish,
        shutdown,
    }
}

/// Translate [`MqttConnectionSettings`] into the `rumqttc` options used to construct the
/// underlying client and event loop.
fn mqtt_options(settings: &MqttConnectionSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.hostname.clone(),
        settings.tcp_port,
    );
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(settings.clean_session);

    if let Ok(Some(password)) = settings.resolve_password() {
        let username = settings.username.clone().unwrap_or_default();
        options.set_credentials(username, password);
    } else if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), String::new());
    }

    if settings.use_tls {
        options.set_transport(transport(settings));
    }

    options
}

fn transport(settings: &MqttConnectionSettings) -> Transport {
    let ca = settings
        .ca_file
        .as_ref()
        .and_then(|path| std::fs::read(path).ok())
        .unwrap_or_default();
    let client_auth = match (&settings.cert_file, &settings.key_file) {
        (Some(cert_path), Some(key_path)) => {
            match (std::fs::read(cert_path), std::fs::read(key_path)) {
                (Ok(cert), Ok(key)) => Some((cert, key)),
                _ => None,
            }
        }
        _ => None,
    };
    Transport::Tls(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_settings::MqttConnectionSettingsBuilder;

    #[test]
    fn mqtt_options_carries_client_id_and_port() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("test-client")
            .hostname("broker.example.com")
            .tcp_port(1884_u16)
            .use_tls(false)
            .build()
            .unwrap();
        let options = mqtt_options(&settings);
        assert_eq!(options.client_id(), "test-client");
        assert_eq!(options.broker_address(), ("broker.example.com".to_string(), 1884));
    }

    #[tokio::test]
    async fn spawn_returns_a_usable_client_and_running_task() {
        let settings = MqttConnectionSettingsBuilder::default()
            .client_id("test-client")
            .hostname("127.0.0.1")
            .tcp_port(1_u16)
            .use_tls(false)
            .build()
            .unwrap();
        let handle = spawn(&settings, false);
        assert!(handle.incoming_publish.is_none());
        // Terminate immediately rather than waiting on a real broker connection; this only
        // exercises that the command loop task is alive and accepting commands.
        let result = handle.client.terminate().await;
        assert!(result.is_ok());
        let _ = handle.task.await;
    }
}
