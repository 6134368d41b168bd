use broke_protocol::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endpoint workers connect to (`tcp://`, `ipc://` or `inproc://`)
    pub address: String,
    /// Age after which an unacknowledged message is redelivered; also the
    /// scan cadence
    pub redelivery_interval_ms: u64,
    /// Fresh messages buffered between producers and the dispatcher
    pub work_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Where to serve `/metrics`; disabled when unset
    pub metrics_address: Option<String>,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            address: "tcp://*:5555".to_string(),
            redelivery_interval_ms: 1000,
            work_buffer: 1,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            metrics_address: None,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn endpoint(&self) -> anyhow::Result<Endpoint> {
        Ok(self.broker.address.parse()?)
    }

    pub fn redelivery_interval(&self) -> Duration {
        Duration::from_millis(self.broker.redelivery_interval_ms)
    }
}
