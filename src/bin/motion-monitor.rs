//! Motion Monitor
//!
//! Subscribes to the motion and status topics of every sensor under a prefix
//! and prints what the nodes publish.

use clap::Parser;
use motion_node::protocol::{STATUS_OFFLINE, STATUS_ONLINE, canonicalize_topic, classify_motion_payload};
use motion_node::sensor::MotionKind;
use motion_node::transport::mqtt::{ReconnectPolicy, topic_matches};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use url::Url;

/// Watch motion sensor traffic on an MQTT broker
#[derive(Parser)]
#[command(name = "motion-monitor")]
#[command(about = "Print motion and status events published by sensor nodes")]
#[command(version)]
struct Args {
    /// Broker URL
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Topic prefix the sensors publish under
    #[arg(long, default_value = "sensors")]
    topic_prefix: String,

    /// Only show one sensor
    #[arg(long)]
    sensor_id: Option<String>,

    /// Output format (pretty, compact, or json)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded, human-readable with timestamps
    Pretty,
    /// Single line per message
    Compact,
    /// One JSON object per message
    Json,
}

/// What a received publish means
#[derive(Debug, Clone, PartialEq)]
enum SensorEvent {
    Motion(MotionKind),
    Status(String),
    Unknown,
}

impl SensorEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::Motion(MotionKind::Detected) => "MOTION",
            Self::Motion(MotionKind::ActivityStopped) => "STOPPED",
            Self::Status(_) => "STATUS",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Self::Motion(MotionKind::Detected) => "\x1b[1;32m",
            Self::Motion(MotionKind::ActivityStopped) => "\x1b[1;34m",
            Self::Status(s) if s == STATUS_ONLINE => "\x1b[1;36m",
            Self::Status(s) if s == STATUS_OFFLINE => "\x1b[1;31m",
            Self::Status(_) => "\x1b[1;33m",
            Self::Unknown => "\x1b[0;37m",
        }
    }
}

const RESET: &str = "\x1b[0m";

struct TopicFilters {
    motion: String,
    status: String,
}

impl TopicFilters {
    fn new(prefix: &str, sensor_id: Option<&str>) -> Self {
        let sensor = sensor_id.unwrap_or("+");
        let base = canonicalize_topic(&format!("{prefix}/{sensor}"));
        Self {
            motion: format!("{base}/motion"),
            status: format!("{base}/status"),
        }
    }

    fn classify(&self, topic: &str, payload: &[u8]) -> SensorEvent {
        if topic_matches(&self.motion, topic) {
            classify_motion_payload(payload)
                .map(SensorEvent::Motion)
                .unwrap_or(SensorEvent::Unknown)
        } else if topic_matches(&self.status, topic) {
            SensorEvent::Status(String::from_utf8_lossy(payload).trim().to_string())
        } else {
            SensorEvent::Unknown
        }
    }
}

/// Sensor ID is the level just above the leaf
fn sensor_from_topic(topic: &str) -> &str {
    let mut levels = topic.rsplit('/');
    levels.next();
    levels.next().unwrap_or("?")
}

fn format_event(event: &SensorEvent, topic: &str, payload: &str, format: &OutputFormat) -> String {
    let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");
    let sensor = sensor_from_topic(topic);

    match format {
        OutputFormat::Json => {
            let json_output = serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "sensor": sensor,
                "event": event.label(),
                "topic": topic,
                "payload": serde_json::from_str::<serde_json::Value>(payload)
                    .unwrap_or_else(|_| serde_json::Value::String(payload.to_string())),
            });
            serde_json::to_string(&json_output).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Compact => {
            format!("{timestamp} [{}] {sensor} {}", event.label(), payload.trim())
        }
        OutputFormat::Pretty => format!(
            "{}[{}]{RESET} {timestamp} {sensor:<16} {}",
            event.color_code(),
            event.label(),
            payload.trim()
        ),
    }
}

fn setup_mqtt_client(args: &Args) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    let url = Url::parse(&args.broker_url)?;
    let host = url.host_str().ok_or("broker URL has no host")?;
    let tls = matches!(url.scheme(), "mqtts" | "ssl");
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let client_id = format!("motion-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    if tls {
        mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
    }
    if let Some(username) = &args.username {
        mqtt_options.set_credentials(username, args.password.clone().unwrap_or_default());
    }
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_start(true);

    Ok(AsyncClient::new(mqtt_options, 100))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("motion_monitor=info,rumqttc=warn")
        .init();

    let args = Args::parse();
    let filters = TopicFilters::new(&args.topic_prefix, args.sensor_id.as_deref());

    println!("Motion Monitor");
    println!("==============");
    println!("Broker: {}", args.broker_url);
    println!("  - {}", filters.motion);
    println!("  - {}", filters.status);
    println!("Press Ctrl+C to stop monitoring");
    println!();

    let backoff = ReconnectPolicy::Exponential {
        base_ms: 1_000,
        max_ms: 30_000,
    };
    let mut failures = 0u32;

    loop {
        let (client, mut eventloop) = setup_mqtt_client(&args)?;

        for filter in [&filters.motion, &filters.status] {
            if let Err(e) = client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
                error!("Failed to queue subscription to {}: {}", filter, e);
            }
        }

        loop {
            let event = tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Disconnecting from MQTT broker...");
                    let _ = tokio::time::timeout(Duration::from_millis(500), client.disconnect()).await;
                    return Ok(());
                }
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(&publish.topic).to_string();
                    let payload = String::from_utf8_lossy(&publish.payload);
                    let sensor_event = filters.classify(&topic, &publish.payload);
                    println!("{}", format_event(&sensor_event, &topic, &payload, &args.format));
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    failures = 0;
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    info!("Subscribed to sensor topics");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection lost: {}", e);
                    break;
                }
            }
        }

        failures = failures.saturating_add(1);
        let delay_ms = backoff.delay_for_attempt(failures);
        warn!("Reconnecting in {}ms...", delay_ms);
        tokio::select! {
            _ = signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}
