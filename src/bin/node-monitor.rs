//! Node Monitor
//!
//! Watches a node's topic tree (telemetry, commands and status) and prints
//! every message, color coded by kind with highlighted JSON payloads.

use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sensornode::protocol::topic_matches;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Monitor MQTT traffic of a sensor node
#[derive(Parser)]
#[command(name = "node-monitor")]
#[command(about = "Monitor telemetry, command and status traffic of a sensor node")]
#[command(version)]
struct Args {
    /// Which traffic to show (all, telemetry, commands or status)
    #[arg(short, long, default_value = "all")]
    mode: MonitorMode,

    /// Output format (pretty, compact, or json)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Telemetry topic root; readings arrive on `<root>/<metric>`
    #[arg(long, default_value = "esp32/sensors")]
    telemetry_root: String,

    /// Control topic
    #[arg(long, default_value = "esp32/commands")]
    commands_topic: String,

    /// Status topic
    #[arg(long, default_value = "esp32/status")]
    status_topic: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// MQTT username (optional)
    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT password (optional)
    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum MonitorMode {
    All,
    /// Sensor readings only
    Telemetry,
    /// Commands sent to the node
    Commands,
    /// Lifecycle records, heartbeats and status replies
    Status,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded, human-readable with timestamps (default)
    Pretty,
    /// Single line per message
    Compact,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MessageType {
    Telemetry,
    Command,
    Status,
    Unknown,
}

impl MessageType {
    fn from_topic(topic: &str, args: &Args) -> Self {
        if topic == args.commands_topic {
            Self::Command
        } else if topic == args.status_topic {
            Self::Status
        } else if topic_matches(&telemetry_filter(args), topic) {
            Self::Telemetry
        } else {
            Self::Unknown
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Telemetry => "TELEMETRY",
            Self::Command => "COMMAND",
            Self::Status => "STATUS",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Self::Telemetry => "\x1b[1;32m", // Green
            Self::Command => "\x1b[1;34m",   // Blue
            Self::Status => "\x1b[1;33m",    // Yellow
            Self::Unknown => "\x1b[0;37m",   // White
        }
    }

    fn is_relevant_for_mode(&self, mode: &MonitorMode) -> bool {
        match mode {
            MonitorMode::All => true,
            MonitorMode::Telemetry => *self == Self::Telemetry,
            MonitorMode::Commands => *self == Self::Command,
            MonitorMode::Status => *self == Self::Status,
        }
    }
}

const RESET: &str = "\x1b[0m";
const JSON_KEY_COLOR: &str = "\x1b[94m";
const JSON_STRING_COLOR: &str = "\x1b[92m";
const JSON_NUMBER_COLOR: &str = "\x1b[93m";
const JSON_LITERAL_COLOR: &str = "\x1b[95m";

/// Color a pretty-printed JSON document token by token
fn highlight_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len() * 2);
    let mut chars = json.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        match ch {
            '"' => {
                let mut end = start + 1;
                let mut escaped = false;
                for (i, c) in chars.by_ref() {
                    end = i + c.len_utf8();
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    }
                }
                let is_key = json[end..].trim_start().starts_with(':');
                let color = if is_key {
                    JSON_KEY_COLOR
                } else {
                    JSON_STRING_COLOR
                };
                out.push_str(color);
                out.push_str(&json[start..end]);
                out.push_str(RESET);
            }
            '-' | '0'..='9' => {
                let mut end = start + 1;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-') {
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(JSON_NUMBER_COLOR);
                out.push_str(&json[start..end]);
                out.push_str(RESET);
            }
            't' | 'f' | 'n' => {
                let literal = ["true", "false", "null"]
                    .into_iter()
                    .find(|word| json[start..].starts_with(word));
                match literal {
                    Some(word) => {
                        for _ in 1..word.len() {
                            chars.next();
                        }
                        out.push_str(JSON_LITERAL_COLOR);
                        out.push_str(word);
                        out.push_str(RESET);
                    }
                    None => out.push(ch),
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn format_message(msg_type: MessageType, topic: &str, payload: &str, format: &OutputFormat) -> String {
    let timestamp = chrono::Utc::now().format("%H:%M:%S");
    let parsed = serde_json::from_str::<serde_json::Value>(payload).ok();

    match format {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "timestamp": timestamp.to_string(),
                "message_type": msg_type.label(),
                "topic": topic,
                "payload": parsed.unwrap_or_else(|| serde_json::Value::String(payload.to_string())),
            });
            line.to_string()
        }
        OutputFormat::Compact => format!(
            "{} [{}] {} {}",
            timestamp,
            msg_type.label(),
            topic,
            payload.replace('\n', " ").trim()
        ),
        OutputFormat::Pretty => {
            let color = msg_type.color_code();
            let label = msg_type.label();
            let body = match parsed.and_then(|json| serde_json::to_string_pretty(&json).ok()) {
                Some(pretty) => highlight_json(&pretty),
                // Commands are bare verbs
                None => payload.to_string(),
            };
            format!("{color}[{label}]{RESET} {timestamp} {topic}\n{body}\n")
        }
    }
}

fn setup_mqtt_client(args: &Args) -> (AsyncClient, EventLoop) {
    let client_id = format!("node-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        mqtt_options.set_credentials(username, password);
    }
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_clean_session(true);

    AsyncClient::new(mqtt_options, 100)
}

fn telemetry_filter(args: &Args) -> String {
    format!("{}/#", args.telemetry_root)
}

async fn subscribe_to_topics(client: &AsyncClient, args: &Args) -> Result<(), rumqttc::ClientError> {
    let telemetry_filter = telemetry_filter(args);
    let filters: Vec<&str> = match args.mode {
        MonitorMode::All => vec![
            telemetry_filter.as_str(),
            args.commands_topic.as_str(),
            args.status_topic.as_str(),
        ],
        MonitorMode::Telemetry => vec![telemetry_filter.as_str()],
        MonitorMode::Commands => vec![args.commands_topic.as_str()],
        MonitorMode::Status => vec![args.status_topic.as_str()],
    };

    for filter in filters {
        info!(filter = %filter, "Subscribing");
        client.subscribe(filter, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn print_message(args: &Args, topic: &str, payload: &[u8]) {
    let msg_type = MessageType::from_topic(topic, args);
    if !msg_type.is_relevant_for_mode(&args.mode) {
        return;
    }

    let payload = String::from_utf8_lossy(payload);
    let formatted = format_message(msg_type, topic, &payload, &args.format);
    match args.format {
        OutputFormat::Pretty => print!("{formatted}"),
        OutputFormat::Compact | OutputFormat::Json => println!("{formatted}"),
    }
}

/// Poll until the connection drops; returns whether a ConnAck was seen
async fn pump_events(args: &Args, event_loop: &mut EventLoop) -> bool {
    let mut connected = false;
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                print_message(args, &publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                connected = true;
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => info!("Subscription acknowledged"),
            Ok(_) => {}
            Err(e) => {
                if connected {
                    warn!("MQTT connection lost: {}", e);
                } else {
                    error!("MQTT connection error: {}", e);
                }
                return connected;
            }
        }
    }
}

async fn monitor(args: &Args) {
    let mut reconnect_delay = 1;

    loop {
        info!(
            broker_host = %args.broker_host,
            broker_port = args.broker_port,
            "Connecting to MQTT broker..."
        );
        let (client, mut event_loop) = setup_mqtt_client(args);

        // Requests queue until the event loop connects
        if let Err(e) = subscribe_to_topics(&client, args).await {
            error!("Failed to subscribe to topics: {}", e);
        } else if pump_events(args, &mut event_loop).await {
            reconnect_delay = 1;
        }

        warn!("Reconnecting in {} seconds...", reconnect_delay);
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY_SECS);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("node_monitor=info,rumqttc=warn")
        .init();

    let args = Args::parse();

    println!("Sensor Node - MQTT Monitor");
    println!("==========================");
    println!("Mode: {:?}", args.mode);
    println!("Format: {:?}", args.format);
    println!("MQTT Broker: {}:{}", args.broker_host, args.broker_port);
    println!("Press Ctrl+C to stop monitoring");
    println!();

    tokio::select! {
        _ = monitor(&args) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down monitor...");
        }
    }
}
