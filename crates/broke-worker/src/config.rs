use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub broker_address: String,
    pub worker_id: Option<String>,
    /// Workers started by one process; each gets identity `<id>-<n>`
    pub workers: usize,
    pub processing_delay_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            broker_address: "tcp://127.0.0.1:5555".to_string(),
            worker_id: None,
            workers: 3,
            processing_delay_ms: 2000,
            reconnect_interval_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let uuid = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, pid, &uuid[..8])
    }

    /// Identities for every worker this process runs
    pub fn worker_identities(&self) -> Vec<String> {
        let base = self.generate_worker_id();
        (1..=self.workers.max(1))
            .map(|n| format!("{}-{}", base, n))
            .collect()
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_id_wins() {
        let config = WorkerConfig {
            worker_id: Some("alpha".to_string()),
            workers: 2,
            ..Default::default()
        };
        assert_eq!(config.generate_worker_id(), "alpha");
        assert_eq!(config.worker_identities(), vec!["alpha-1", "alpha-2"]);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let config = WorkerConfig::default();
        let a = config.generate_worker_id();
        let b = config.generate_worker_id();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_zero_workers_still_runs_one() {
        let config = WorkerConfig {
            worker_id: Some("w".to_string()),
            workers: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_identities(), vec!["w-1"]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broker_address: \"inproc://b\"\nprocessing_delay_ms: 0\n").unwrap();

        let config = WorkerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.broker_address, "inproc://b");
        assert_eq!(config.processing_delay_ms, 0);
        assert_eq!(config.workers, 3);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
    }
}
