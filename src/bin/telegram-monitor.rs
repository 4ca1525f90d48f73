//! Debug tool that prints telegrams seen by the gateway.
//!
//! Usage:
//!   cargo run --bin telegram-monitor -- --config config.yaml
//!   cargo run --bin telegram-monitor -- --sender 05:81:A2:C3
//!
//! Connects to the broker, subscribes to the gateway rx topic and logs each
//! telegram with every decoding that fits it.

use clap::Parser;
use enocean_mqtt_bridge::config::{Config, load_dotenv};
use enocean_mqtt_bridge::eep::{Telegram, dimmer, opening, parse_id, relay, rocker, rorg, shutter};
use enocean_mqtt_bridge::transport::mqtt::{self, MqttClient, MqttEvent};
use enocean_mqtt_bridge::transport::radio::TelegramMessage;
use log::{info, warn};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "telegram-monitor")]
#[command(about = "Print EnOcean telegrams relayed by the MQTT gateway")]
struct Cli {
    /// YAML configuration file (broker and gateway topics)
    #[arg(long, short, env = "ENOCEAN_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Only show telegrams from this sender
    #[arg(long)]
    sender: Option<String>,
}

fn describe(telegram: &Telegram) -> Vec<String> {
    let mut lines = Vec::new();
    match telegram.rorg() {
        Some(rorg::RPS) => {
            if let Ok(action) = rocker::decode(telegram) {
                lines.push(format!("rocker: {} {:?}", action.press, action.button));
            }
            if let Ok(state) = opening::decode_handle(telegram) {
                lines.push(format!("window handle: {state}"));
            }
            if let Ok(status) = shutter::decode_status(telegram) {
                lines.push(format!("shutter: {}", status.kind));
            }
        }
        Some(rorg::BS1) => {
            if let Ok(state) = opening::decode_contact(telegram) {
                lines.push(format!("contact: {state}"));
            }
        }
        Some(rorg::BS4) => {
            if telegram.is_4bs_teach_in() {
                lines.push("teach-in".to_string());
            }
            if let Ok(action) = relay::decode_command(telegram) {
                lines.push(format!("relay: {}", action.switch_state));
            }
            if let Ok(action) = dimmer::decode(telegram) {
                lines.push(format!("dimmer: {} {}%", action.switch_state, action.dim_state));
            }
            if let Ok(status) = shutter::decode_status(telegram) {
                lines.push(format!("shutter: {} {:?}", status.kind, status.time.or(status.position)));
            }
        }
        _ => {}
    }
    lines
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    load_dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let sender_filter = match cli.sender.as_deref().map(parse_id) {
        Some(None) => {
            eprintln!("Invalid sender id");
            std::process::exit(2);
        }
        Some(id) => id,
        None => None,
    };

    let path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using defaults, cannot load {:?}: {}", path, e);
            Config::default()
        }
    };
    config.apply_env();

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let mqtt_client = MqttClient::new(&config.mqtt);
    let client = mqtt_client.client();
    let (tx, mut rx) = mpsc::channel(100);
    tokio::spawn(mqtt_client.run(tx));

    let topics = vec![config.enocean.rx_topic.clone()];
    while let Some(event) = rx.recv().await {
        match event {
            MqttEvent::Connected => mqtt::subscribe_all(&client, &topics),
            MqttEvent::Disconnected(reason) => warn!("Disconnected: {}", reason),
            MqttEvent::Message(message) => {
                let telegram = match serde_json::from_str::<TelegramMessage>(&message.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|m| Telegram::try_from(m).map_err(|e| e.to_string()))
                {
                    Ok(telegram) => telegram,
                    Err(e) => {
                        warn!("Unreadable gateway message: {}", e);
                        continue;
                    }
                };
                if sender_filter.is_some_and(|id| id != telegram.sender) {
                    continue;
                }
                info!("{}", telegram);
                for line in describe(&telegram) {
                    info!("    {}", line);
                }
            }
        }
    }
}
