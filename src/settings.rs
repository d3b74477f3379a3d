use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::io::mqtt::{client_id_for_port, MqttConfig};
use crate::worker::{WorkerConfig, MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct SerialSettings {
    #[serde(default = "default_serial_port")]
    pub port: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64, // clamped to 20..=1000
    #[serde(default)]
    pub publish_errors: bool,
}

fn default_serial_port() -> String {
    if cfg!(windows) {
        "COM9".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            mqtt: MqttConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            publish_errors: false,
        }
    }
}

impl AppSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }

    /// Broker settings with the client ID defaulted from the serial port
    pub fn mqtt_config(&self) -> MqttConfig {
        let mut mqtt = self.mqtt.clone();
        if mqtt.client_id.is_none() {
            mqtt.client_id = Some(client_id_for_port(&self.serial.port));
        }
        mqtt
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            readings_topic: self.mqtt.readings_topic.clone(),
            errors_topic: self.mqtt.errors_topic.clone(),
            publish_errors: self.publish_errors,
            poll_interval: self.poll_interval(),
        }
    }
}

/// Default settings location: `<config dir>/wind-receiver/config.toml`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wind-receiver")
        .join("config.toml")
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings, SettingsError> {
    if !path.exists() {
        tracing::info!("[settings] {} not found, using defaults", path.display());
        return Ok(AppSettings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_settings(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_settings(content: &str) -> Result<AppSettings, toml::de::Error> {
    toml::from_str(content)
}
