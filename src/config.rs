//! Application configuration
//!
//! Stored as TOML in the user's config directory. A missing file is created
//! with the defaults on first start, so the demo runs without any setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::monitor::Monitor;
use crate::mqtt::mqtt_handler::split_broker_url;
use crate::mqtt::topics::Topic;
use crate::mqtt::transport::{SessionOptions, Transport};
use crate::mqtt::{LocalBroker, MqttTransport};
use crate::sensor::{default_publishers, PublisherConfig};

const CONFIG_DIR: &str = "envmonitor";
const CONFIG_FILE: &str = "config.toml";

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "ENVMONITOR_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Real broker at `broker.url`
    Mqtt,
    /// In-process broker, no network needed
    Local,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub transport: TransportKind,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub qos: u8,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "tcp://broker.hivemq.com:1883".to_string(),
            transport: TransportKind::Mqtt,
            keep_alive_secs: 5,
            connect_timeout_ms: 5000,
            qos: 1,
        }
    }
}

impl BrokerConfig {
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Broker-wide session settings, identity is filled in per client
    pub fn session_template(&self) -> SessionOptions {
        SessionOptions::new("envmonitor")
            .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .with_qos(self.qos())
    }

    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, ConfigError> {
        match self.transport {
            TransportKind::Mqtt => {
                let transport = MqttTransport::new(&self.url, self.connect_timeout())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Arc::new(transport))
            }
            TransportKind::Local => {
                info!("Using the in-process broker");
                Ok(Arc::new(LocalBroker::new()))
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    /// Connect right after startup
    pub auto_connect: bool,
    /// Upper bound for a publisher to observe a stop before it is aborted
    pub stop_timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            stop_timeout_ms: 2000,
        }
    }
}

impl MonitorSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EnvMonitorConfig {
    pub broker: BrokerConfig,
    pub monitor: MonitorSettings,
    pub publishers: Vec<PublisherConfig>,
}

impl Default for EnvMonitorConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            monitor: MonitorSettings::default(),
            publishers: default_publishers(),
        }
    }
}

impl EnvMonitorConfig {
    /// `$ENVMONITOR_CONFIG`, or `<config dir>/envmonitor/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, self.to_toml()?)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Loads the file, or writes the defaults there if it does not exist yet
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if exists {
            return Self::load(path).await;
        }

        let config = Self::default();
        if let Err(e) = config.save(path).await {
            warn!("Could not write default config: {}", e);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.transport == TransportKind::Mqtt {
            split_broker_url(&self.broker.url).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.broker.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "qos must be 0, 1 or 2, got {}",
                self.broker.qos
            )));
        }
        if self.monitor.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stop_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let mut client_ids = HashSet::new();
        for publisher in &self.publishers {
            if publisher.client_id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "publisher {} has an empty client_id",
                    publisher.name
                )));
            }
            if !client_ids.insert(publisher.client_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "client_id {} is used by more than one publisher",
                    publisher.client_id
                )));
            }
            if publisher.interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "publisher {} needs an interval_ms greater than zero",
                    publisher.name
                )));
            }
            for sensor in &publisher.sensors {
                if sensor.topic.is_empty() || sensor.topic.contains(['+', '#']) {
                    return Err(ConfigError::Invalid(format!(
                        "sensor {} of {} has an invalid topic '{}'",
                        sensor.name, publisher.name, sensor.topic
                    )));
                }
                if sensor.topic.parse::<Topic>().is_err() {
                    warn!(
                        "Sensor {} publishes to {}, which the monitor does not display",
                        sensor.name, sensor.topic
                    );
                }
            }
        }
        Ok(())
    }

    pub fn build_monitor(&self) -> Result<Monitor, ConfigError> {
        self.validate()?;
        let transport = self.broker.build_transport()?;
        Ok(Monitor::new(
            transport,
            self.broker.session_template(),
            self.publishers.clone(),
            self.monitor.stop_timeout(),
        ))
    }
}
