use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use wind_receiver_lib::io::serial::{list_serial_ports, SerialReader};
use wind_receiver_lib::io::MqttQueue;
use wind_receiver_lib::{logging, settings, WindWorker};

/// Wind sensor receiver: serial anemometer -> MQTT
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Settings file (TOML). Defaults to <config dir>/wind-receiver/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the settings file
    #[arg(short, long)]
    port: Option<String>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    if args.list_ports {
        for port in list_serial_ports().context("Failed to enumerate ports")? {
            println!(
                "{}\t{}\t{}",
                port.port_name,
                port.port_type,
                port.product.unwrap_or_default()
            );
        }
        return Ok(());
    }

    let settings_path = args.config.unwrap_or_else(settings::default_settings_path);
    let mut settings = settings::load_settings(&settings_path)?;
    if let Some(port) = args.port {
        settings.serial.port = port;
    }

    let mqtt = settings.mqtt_config();
    let queue = MqttQueue::connect(&mqtt);
    if !queue.wait_connected(mqtt.connect_timeout()).await {
        warn!(
            "MQTT broker not reachable after {}s, readings are dropped until it connects",
            mqtt.connect_timeout_secs
        );
    }

    let reader = SerialReader::new(settings.serial.port.clone());
    let mut worker = WindWorker::new(reader, queue, settings.worker_config());

    let cancel_flag = worker.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            cancel_flag.store(true, Ordering::Relaxed);
        }
    });

    let result = worker.run().await;
    worker.into_queue().shutdown().await;

    match result {
        Ok(stats) => {
            info!("Published {} reading(s)", stats.readings_published);
            Ok(())
        }
        Err(e) => {
            // An external supervisor is expected to restart the service
            error!("{}", e);
            Err(e.into())
        }
    }
}
