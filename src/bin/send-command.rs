//! Send one control command to a running bridge
//!
//! ```bash
//! # Access code
//! send-command --topic sterilor --device SN-0042 --name 000a --payload '{"pincode": 1234}'
//!
//! # Empty payload, TLS broker
//! send-command --broker-url mqtts://broker.example:8883 --topic sterilor \
//!   --device SN-0042 --name 0002
//! ```

use ble2mqtt::protocol::{Message, TopicSet};
use ble2mqtt::transport::mqtt::parse_broker_url;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use serde_json::Value;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{timeout, Duration};

#[derive(Parser)]
#[command(
    name = "send-command",
    about = "Publish a {name, payload} control command for a ble2mqtt bridge"
)]
struct Args {
    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883", env = "BLE2MQTT_BROKER_URL")]
    broker_url: String,

    /// Base topic the bridge is configured with
    #[arg(long)]
    topic: String,

    /// Device serial number
    #[arg(long)]
    device: String,

    /// Frame name, e.g. 000a
    #[arg(long)]
    name: String,

    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,
}

async fn send(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let topics = TopicSet::new(&args.topic, &args.device)?;
    let payload: Value = serde_json::from_str(&args.payload)?;
    let body = serde_json::to_vec(&Message::new(args.name.clone(), payload))?;

    let address = parse_broker_url(&args.broker_url)?;
    let client_id = format!(
        "send-command-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()
    );
    let mut options = MqttOptions::new(client_id, address.host.as_str(), address.port);
    options.set_keep_alive(Duration::from_secs(30));
    if address.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    if let Some(username) = &args.username {
        options.set_credentials(username, args.password.as_deref().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    println!(
        "Connecting to MQTT broker {}:{}...",
        address.host, address.port
    );

    client
        .publish(topics.control_topic(), QoS::AtLeastOnce, false, body)
        .await?;

    // Drive the event loop until the broker acknowledges the publish
    timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::PubAck(_)) => return Ok::<_, rumqttc::ConnectionError>(()),
                _ => continue,
            }
        }
    })
    .await
    .map_err(|_| "timed out waiting for PubAck")??;

    println!("Sent {} to {}", args.name, topics.control_topic());
    client.disconnect().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if let Err(e) = send(args).await {
        eprintln!("send-command failed: {e}");
        process::exit(1);
    }
}
