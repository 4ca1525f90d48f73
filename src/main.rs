use clap::Parser;
use enocean_mqtt_bridge::config::{Config, load_dotenv};
use enocean_mqtt_bridge::device::DeviceRegistry;
use enocean_mqtt_bridge::runtime;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "enocean-mqtt-bridge")]
#[command(about = "Bridge EnOcean actors and sensors to an MQTT broker")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, env = "ENOCEAN_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logger(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    load_dotenv();

    let cli = Cli::parse();
    init_logger(&cli.log_level);
    info!("Starting EnOcean MQTT bridge");

    let path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration {:?}: {}", path, e);
            std::process::exit(1);
        }
    };
    config.apply_env();
    info!("Configuration loaded from {:?}:", path);
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Gateway base id: {:08X}", config.enocean.base_id);
    info!("  Devices: {}", config.devices.len());

    let registry = DeviceRegistry::with_defaults();
    if let Err(e) = runtime::run(config, &registry).await {
        error!("Bridge stopped: {}", e);
        std::process::exit(1);
    }
    info!("Bridge stopped");
}
