use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message counters
    pub messages_pushed: IntCounter,
    pub messages_delivered: IntCounter,
    pub messages_redelivered: IntCounter,

    // Acknowledgments
    pub acks_matched: IntCounter,
    pub acks_unmatched: IntCounter,

    pub exchange_errors: IntCounter,

    // Gauges
    pub pending_depth: IntGauge,
    pub workers_known: IntGauge,
}

impl BrokerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_pushed = IntCounter::new(
            "broke_messages_pushed_total",
            "Fresh messages accepted from producers",
        )?;
        registry.register(Box::new(messages_pushed.clone()))?;

        let messages_delivered = IntCounter::new(
            "broke_messages_delivered_total",
            "Messages handed to a worker, first attempts and redeliveries",
        )?;
        registry.register(Box::new(messages_delivered.clone()))?;

        let messages_redelivered = IntCounter::new(
            "broke_messages_redelivered_total",
            "Messages evicted after the redelivery interval and sent again",
        )?;
        registry.register(Box::new(messages_redelivered.clone()))?;

        let acks_matched = IntCounter::new(
            "broke_acks_matched_total",
            "Acknowledgments that removed a pending message",
        )?;
        registry.register(Box::new(acks_matched.clone()))?;

        let acks_unmatched = IntCounter::new(
            "broke_acks_unmatched_total",
            "Acknowledgments for ids no longer pending",
        )?;
        registry.register(Box::new(acks_unmatched.clone()))?;

        let exchange_errors = IntCounter::new(
            "broke_exchange_errors_total",
            "Worker exchanges abandoned because of transport or decode errors",
        )?;
        registry.register(Box::new(exchange_errors.clone()))?;

        let pending_depth = IntGauge::new(
            "broke_pending_depth",
            "Messages delivered or queued but not yet acknowledged",
        )?;
        registry.register(Box::new(pending_depth.clone()))?;

        let workers_known = IntGauge::new("broke_workers_known", "Distinct worker identities seen")?;
        registry.register(Box::new(workers_known.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_pushed,
            messages_delivered,
            messages_redelivered,
            acks_matched,
            acks_unmatched,
            exchange_errors,
            pending_depth,
            workers_known,
        })
    }

    /// Record the outcome of an acknowledgment
    pub fn observe_ack(&self, matched: bool) {
        if matched {
            self.acks_matched.inc();
        } else {
            self.acks_unmatched.inc();
        }
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
