use broke_core::MessageId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// What the broker has observed about one worker identity.
///
/// This is bookkeeping only. Redelivery is decided by message age, never by
/// anything recorded here.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub identity: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub requests: u64,
    pub deliveries: u64,
    pub acks: u64,
    /// Message most recently handed to this worker and not yet acknowledged
    pub assigned: Option<MessageId>,
}

impl WorkerInfo {
    pub fn new(identity: String) -> Self {
        let now = Utc::now();
        WorkerInfo {
            identity,
            first_seen: now,
            last_seen: now,
            requests: 0,
            deliveries: 0,
            acks: 0,
            assigned: None,
        }
    }
}

/// Registry of every worker identity that has talked to the broker
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Record a request carrying `ack`. Returns true the first time an
    /// identity is seen.
    pub fn record_request(&self, identity: &str, ack: MessageId) -> bool {
        let mut workers = self.workers.write();
        let is_new = !workers.contains_key(identity);
        let worker = workers
            .entry(identity.to_string())
            .or_insert_with(|| WorkerInfo::new(identity.to_string()));

        worker.last_seen = Utc::now();
        worker.requests += 1;
        if ack.is_valid() {
            worker.acks += 1;
            if worker.assigned == Some(ack) {
                worker.assigned = None;
            }
        }
        is_new
    }

    /// Record that `id` was handed to `identity`
    pub fn record_delivery(&self, identity: &str, id: MessageId) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(identity) {
            worker.deliveries += 1;
            worker.assigned = Some(id);
        }
    }

    /// Identity of the worker that was last handed `id`, if it never acked it
    pub fn holder_of(&self, id: MessageId) -> Option<String> {
        let workers = self.workers.read();
        workers
            .values()
            .find(|w| w.assigned == Some(id))
            .map(|w| w.identity.clone())
    }

    /// Get worker info
    pub fn get(&self, identity: &str) -> Option<WorkerInfo> {
        self.workers.read().get(identity).cloned()
    }

    /// Get all workers
    pub fn all_workers(&self) -> Vec<WorkerInfo> {
        self.workers.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.workers.read().len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_registers() {
        let registry = WorkerRegistry::new();
        assert!(registry.record_request("A", MessageId::INVALID));
        assert!(!registry.record_request("A", MessageId::INVALID));

        let info = registry.get("A").unwrap();
        assert_eq!(info.requests, 2);
        assert_eq!(info.acks, 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_delivery_then_ack_clears_assignment() {
        let registry = WorkerRegistry::new();
        registry.record_request("A", MessageId::INVALID);
        registry.record_delivery("A", MessageId::new(7));
        assert_eq!(registry.holder_of(MessageId::new(7)).as_deref(), Some("A"));

        registry.record_request("A", MessageId::new(7));
        let info = registry.get("A").unwrap();
        assert_eq!(info.deliveries, 1);
        assert_eq!(info.acks, 1);
        assert!(info.assigned.is_none());
        assert!(registry.holder_of(MessageId::new(7)).is_none());
    }

    #[test]
    fn test_delivery_to_unknown_worker_ignored() {
        let registry = WorkerRegistry::new();
        registry.record_delivery("ghost", MessageId::new(1));
        assert!(registry.get("ghost").is_none());
    }
}
