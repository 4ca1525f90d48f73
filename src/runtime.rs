//! Main loop: pumps MQTT and radio input into the bridge and delivers its
//! output until shutdown.

use crate::bridge::{Bridge, Outbound};
use crate::config::Config;
use crate::device::DeviceRegistry;
use crate::error::{BridgeError, Result};
use crate::transport::mqtt::{self, MqttClient, MqttEvent};
use crate::transport::{EnoceanTransport, MqttRadioTransport};
use chrono::Local;
use log::{debug, error, info, warn};
use rumqttc::AsyncClient;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Loop period.
pub const LOOP_INTERVAL: Duration = Duration::from_millis(20);

/// Telegrams handled per loop iteration.
pub const MAX_TELEGRAMS_PER_LOOP: usize = 50;

pub const CYCLIC_INTERVAL: Duration = Duration::from_secs(1);

pub const STORAGE_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Broker outage after which the process gives up.
pub const MAX_DISCONNECTED: Duration = Duration::from_secs(30);

/// Time granted to the event loop to flush last wills on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn deliver(out: Outbound, client: &AsyncClient, radio: &mut dyn EnoceanTransport) {
    for publication in out.publications {
        mqtt::publish(
            client,
            &publication.topic,
            &publication.payload,
            publication.qos,
            publication.retain,
        );
    }
    for telegram in out.telegrams {
        if let Err(e) = radio.send(&telegram) {
            error!("Failed to send telegram {}: {}", telegram, e);
        }
    }
}

/// Install Ctrl+C (and SIGTERM on unix) handlers that raise `flag`.
fn spawn_signal_handler(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    });
}

/// Run the bridge until a shutdown signal or a fatal connection loss.
pub async fn run(config: Config, registry: &DeviceRegistry) -> Result<()> {
    let devices = registry.create_all(&config.devices);
    if devices.is_empty() {
        warn!("No usable devices configured");
    }

    let mqtt_client = MqttClient::new(&config.mqtt);
    let client = mqtt_client.client();
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mqtt_task = tokio::spawn(mqtt_client.run(event_tx));

    let mut radio = MqttRadioTransport::new(client.clone(), &config.enocean);
    let radio_ctx = radio.open()?;

    let mut bridge = Bridge::new(devices, radio_ctx);
    let mut subscriptions = bridge.subscriptions();
    subscriptions.push(radio.rx_topic().to_string());
    info!(
        "Bridge started with {} devices, {} topics",
        bridge.device_count(),
        subscriptions.len()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(shutdown.clone());

    deliver(bridge.open(Local::now()), &client, &mut radio);

    let mut connected = false;
    let mut disconnected_since = Some(Instant::now());
    let mut last_cyclic = Instant::now();
    let mut last_flush = Instant::now();
    let mut last_check = Instant::now();
    let mut fatal = None;

    let mut ticker = tokio::time::interval(LOOP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !shutdown.load(Ordering::SeqCst) {
        ticker.tick().await;

        while let Ok(event) = event_rx.try_recv() {
            match event {
                MqttEvent::Connected => {
                    connected = true;
                    disconnected_since = None;
                    mqtt::subscribe_all(&client, &subscriptions);
                }
                MqttEvent::Disconnected(reason) => {
                    if connected {
                        warn!("Lost MQTT connection: {}", reason);
                    }
                    connected = false;
                    disconnected_since.get_or_insert_with(Instant::now);
                }
                MqttEvent::Message(message) if message.topic == radio.rx_topic() => {
                    radio.ingest(&message.payload);
                }
                MqttEvent::Message(message) => {
                    let out = bridge.handle_mqtt(&message, Local::now());
                    deliver(out, &client, &mut radio);
                }
            }
        }

        let mut telegrams = Vec::new();
        radio.receive(MAX_TELEGRAMS_PER_LOOP, &mut |telegram| telegrams.push(telegram))?;
        for telegram in &telegrams {
            let out = bridge.handle_telegram(telegram, Local::now());
            deliver(out, &client, &mut radio);
        }

        deliver(bridge.fire_timers(Local::now()), &client, &mut radio);

        if last_cyclic.elapsed() >= CYCLIC_INTERVAL {
            last_cyclic = Instant::now();
            deliver(bridge.run_cyclic(Local::now()), &client, &mut radio);
        }

        if last_flush.elapsed() >= STORAGE_FLUSH_INTERVAL {
            last_flush = Instant::now();
            bridge.flush_storage();
        }

        if last_check.elapsed() >= CONNECTION_CHECK_INTERVAL {
            last_check = Instant::now();
            if let Some(since) = disconnected_since
                && since.elapsed() > MAX_DISCONNECTED
            {
                error!("No MQTT connection for {}s, giving up", since.elapsed().as_secs());
                fatal = Some(BridgeError::ConnectionLost(format!(
                    "broker {}:{} unreachable",
                    config.mqtt.broker_host, config.mqtt.broker_port
                )));
                break;
            }
        }
    }

    info!("Shutting down");
    deliver(bridge.close(Local::now()), &client, &mut radio);
    radio.close();
    if let Err(e) = client.try_disconnect() {
        debug!("MQTT disconnect failed: {}", e);
    }
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    mqtt_task.abort();
    drop(event_rx);

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
