// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Connects to a local broker, subscribes to a topic, and publishes a message to it every
//! second, printing whatever comes back in on the incoming-publish channel.

use std::time::Duration;

use env_logger::Builder;

use mqtt_agent::control_packet::QoS;
use mqtt_agent::{client, MqttConnectionSettingsBuilder};

const CLIENT_ID: &str = "mqtt_agent_demo_client";
const HOSTNAME: &str = "localhost";
const PORT: u16 = 1883;
const TOPIC: &str = "hello/mqtt_agent";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .format_timestamp(None)
        .filter_module("rumqttc", log::LevelFilter::Warn)
        .init();

    let connection_settings = MqttConnectionSettingsBuilder::default()
        .client_id(CLIENT_ID)
        .hostname(HOSTNAME)
        .tcp_port(PORT)
        .use_tls(false)
        .build()?;

    let handle = client::spawn(&connection_settings, true);
    let mut incoming = handle.incoming_publish.expect("requested incoming publish");

    let connect_info = connection_settings.connect_info()?;
    let connect_result = handle.client.connect(connect_info).await?;
    println!("connected, session_present={:?}", connect_result.session_present);

    handle.client.subscribe_one(TOPIC, QoS::AtLeastOnce).await?;

    tokio::spawn(async move {
        while let Some(publish) = incoming.recv().await {
            println!("received on {}: {:?}", publish.topic, publish.payload);
        }
    });

    let mut i = 0;
    loop {
        i += 1;
        let payload = format!("Hello #{i}");
        match handle
            .client
            .publish(TOPIC, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(_) => println!("sent message #{i}"),
            Err(e) => println!("error sending message: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
