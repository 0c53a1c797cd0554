//! Command sender
//!
//! Publishes a bare command verb to a node's control topic at QoS 1 and
//! waits for the broker to acknowledge it.
//!
//! ## Usage
//!
//! ```bash
//! # Flip the simulated LED
//! send-command toggle_led
//!
//! # Ask for a status report and print the node's reply
//! send-command get_status --wait-reply
//!
//! # Send an arbitrary payload (the node logs it as unknown)
//! send-command reboot --raw
//! ```

use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use sensornode::command::Command;
use sensornode::protocol::validate_topic_name;
use sensornode::transport::mqtt::parse_broker_url;
use std::process;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(
    name = "send-command",
    about = "Send a command verb to a sensor node",
    version
)]
struct Args {
    /// Command verb (toggle_led or get_status)
    verb: String,

    /// Publish the verb even if the node does not know it
    #[arg(long)]
    raw: bool,

    /// Control topic
    #[arg(long, default_value = "esp32/commands")]
    topic: String,

    /// Wait for the node's reply on the status topic
    #[arg(long)]
    wait_reply: bool,

    /// Status topic watched by --wait-reply
    #[arg(long, default_value = "esp32/status")]
    status_topic: String,

    /// MQTT broker URL
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker_url: String,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,

    /// Seconds to wait for the acknowledgement (and the reply)
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

fn client_options(args: &Args) -> Result<MqttOptions, Box<dyn std::error::Error>> {
    let broker = parse_broker_url(&args.broker_url)?;
    let client_id = format!("send-command-{}", process::id());
    let mut options = MqttOptions::new(client_id, broker.host, broker.port);

    if broker.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        options.set_credentials(username, password);
    }
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    Ok(options)
}

/// Drive the event loop until our publish is acknowledged and, when asked,
/// a reply shows up on the status topic
async fn await_delivery(
    args: &Args,
    client: &AsyncClient,
    event_loop: &mut EventLoop,
    expects_reply: bool,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut acknowledged = false;
    let mut published = false;

    loop {
        match event_loop.poll().await? {
            Event::Incoming(Packet::ConnAck(_)) => {
                debug!("Connected to broker");
                if expects_reply {
                    client
                        .subscribe(args.status_topic.as_str(), QoS::AtMostOnce)
                        .await?;
                } else {
                    client
                        .publish(args.topic.as_str(), QoS::AtLeastOnce, false, args.verb.clone())
                        .await?;
                    published = true;
                }
            }
            Event::Incoming(Packet::SubAck(_)) if !published => {
                // Subscribed before publishing so the reply cannot be missed
                client
                    .publish(args.topic.as_str(), QoS::AtLeastOnce, false, args.verb.clone())
                    .await?;
                published = true;
            }
            Event::Incoming(Packet::PubAck(_)) => {
                info!(topic = %args.topic, verb = %args.verb, "Command acknowledged by broker");
                acknowledged = true;
                if !expects_reply {
                    return Ok(None);
                }
            }
            Event::Incoming(Packet::Publish(publish))
                if acknowledged && publish.topic == args.status_topic && !publish.retain =>
            {
                return Ok(Some(String::from_utf8_lossy(&publish.payload).into_owned()));
            }
            _ => {}
        }
    }
}

async fn send(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    validate_topic_name(&args.topic)?;
    let command = args.verb.parse::<Command>().ok();
    if command.is_none() && !args.raw {
        return Err(format!(
            "Unknown command '{}' (expected toggle_led or get_status; pass --raw to send anyway)",
            args.verb
        )
        .into());
    }

    let expects_reply = args.wait_reply && command == Some(Command::GetStatus);
    if args.wait_reply && !expects_reply {
        info!("Only get_status produces a reply; not waiting");
    }

    let (client, mut event_loop) = AsyncClient::new(client_options(args)?, 10);
    info!(broker_url = %args.broker_url, topic = %args.topic, verb = %args.verb, "Sending command");

    let timeout = Duration::from_secs(args.timeout_secs);
    let reply = tokio::time::timeout(
        timeout,
        await_delivery(args, &client, &mut event_loop, expects_reply),
    )
    .await
    .map_err(|_| format!("No acknowledgement within {timeout:?}"))??;

    if let Some(reply) = reply {
        println!("{reply}");
    }

    if let Err(e) = client.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("send_command=info,rumqttc=warn")
        .init();

    let args = Args::parse();
    if let Err(e) = send(&args).await {
        error!("Failed to send command: {}", e);
        process::exit(1);
    }
}
