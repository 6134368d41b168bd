use crate::config::BrokerConfig;
use crate::dispatcher::{Dispatcher, Producer};
use crate::metrics::BrokerMetrics;
use crate::scanner::TimeoutScanner;
use crate::worker_registry::WorkerRegistry;
use crate::Result;
use broke_core::{Message, PendingQueue};
use broke_protocol::{Endpoint, RouterSocket};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A bound broker: the router socket, the shared pending queue and the
/// producer side of the work channel. Nothing runs until [`Broker::run`].
pub struct Broker {
    router: RouterSocket,
    queue: Arc<PendingQueue>,
    workers: Arc<WorkerRegistry>,
    metrics: Arc<BrokerMetrics>,
    work_tx: mpsc::Sender<Message>,
    work_rx: mpsc::Receiver<Message>,
}

impl Broker {
    pub async fn bind(config: &BrokerConfig) -> Result<Self> {
        let endpoint: Endpoint = config.broker.address.parse()?;
        Self::bind_endpoint(&endpoint, config.broker.work_buffer).await
    }

    /// Bind `endpoint` directly. A `work_buffer` of 1 makes producers wait
    /// for the dispatcher almost in lockstep.
    pub async fn bind_endpoint(endpoint: &Endpoint, work_buffer: usize) -> Result<Self> {
        let router = RouterSocket::bind(endpoint).await?;
        let (work_tx, work_rx) = mpsc::channel(work_buffer.max(1));

        Ok(Broker {
            router,
            queue: Arc::new(PendingQueue::new()),
            workers: Arc::new(WorkerRegistry::new()),
            metrics: Arc::new(BrokerMetrics::new()?),
            work_tx,
            work_rx,
        })
    }

    /// Endpoint workers should connect to; the real port when bound to port 0
    pub fn local_endpoint(&self) -> &Endpoint {
        self.router.local_endpoint()
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.work_tx.clone())
    }

    pub fn queue(&self) -> Arc<PendingQueue> {
        self.queue.clone()
    }

    pub fn workers(&self) -> Arc<WorkerRegistry> {
        self.workers.clone()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Run the dispatcher and the timeout scanner until `cancel` fires or the
    /// router closes. On the way out anything still in flight between the
    /// tasks lands in the pending queue.
    pub async fn run(self, redelivery_interval: Duration, cancel: CancellationToken) -> Result<()> {
        let Broker {
            router,
            queue,
            workers,
            metrics,
            work_tx,
            work_rx,
        } = self;
        drop(work_tx);

        let (redeliver_tx, redeliver_rx) = mpsc::channel(1);
        let scanner_cancel = cancel.child_token();
        let scanner = TimeoutScanner::new(queue.clone(), redelivery_interval, redeliver_tx);
        let scanner_handle = tokio::spawn(scanner.run(scanner_cancel.clone()));

        info!(
            "Broker running on {} (redelivery after {:?})",
            router.local_endpoint(),
            redelivery_interval
        );

        let mut dispatcher = Dispatcher::new(router, queue.clone(), redeliver_rx, work_rx, workers, metrics);
        let result = dispatcher.run(&cancel).await;

        scanner_cancel.cancel();
        if let Err(e) = scanner_handle.await {
            warn!("Timeout scanner task failed: {}", e);
        }
        dispatcher.drain();

        info!("Broker stopped with {} messages pending", queue.len());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broke_core::MessageId;
    use broke_protocol::{parse_reply, request_frames, DealerSocket};

    #[tokio::test]
    async fn test_bind_from_config() {
        let mut config = BrokerConfig::default();
        config.broker.address = "inproc://broker-test-config".to_string();

        let broker = Broker::bind(&config).await.unwrap();
        assert_eq!(
            broker.local_endpoint(),
            &Endpoint::Inproc("broker-test-config".to_string())
        );
        assert!(broker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let mut config = BrokerConfig::default();
        config.broker.address = "nowhere".to_string();
        assert!(Broker::bind(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_run_delivers_and_stops() {
        let endpoint = Endpoint::Inproc("broker-test-run".to_string());
        let broker = Broker::bind_endpoint(&endpoint, 4).await.unwrap();
        let producer = broker.producer();
        let queue = broker.queue();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broker.run(Duration::from_secs(5), cancel.clone()));

        producer.push(Message::new(1, "Yo")).await.unwrap();

        let mut dealer = DealerSocket::connect(&endpoint, "w").await.unwrap();
        dealer.send(request_frames(MessageId::INVALID)).await.unwrap();
        let frames = tokio::time::timeout(Duration::from_secs(2), dealer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_reply(&frames).unwrap(), Message::new(1, "Yo"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(queue.contains(MessageId::new(1)));
        assert!(producer.push(Message::new(2, "late")).await.is_err());
    }
}
