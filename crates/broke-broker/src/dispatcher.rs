use crate::metrics::BrokerMetrics;
use crate::worker_registry::WorkerRegistry;
use crate::{BrokerError, Result};
use broke_core::{Message, PendingQueue};
use broke_protocol::{parse_request, reply_frames, ProtocolError, RoutedEnvelope, RouterSocket};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handle used to submit fresh messages to a running broker
#[derive(Clone)]
pub struct Producer {
    work: mpsc::Sender<Message>,
}

impl Producer {
    pub(crate) fn new(work: mpsc::Sender<Message>) -> Self {
        Producer { work }
    }

    /// Submit a message, waiting while the hand-off is full. The id must be
    /// non-zero and unique among messages still in flight.
    pub async fn push(&self, message: Message) -> Result<()> {
        if !message.is_valid() {
            return Err(BrokerError::InvalidMessage(message.id));
        }
        self.work.send(message).await.map_err(|_| BrokerError::Stopped)
    }

    /// Submit without waiting
    pub fn try_push(&self, message: Message) -> Result<()> {
        if !message.is_valid() {
            return Err(BrokerError::InvalidMessage(message.id));
        }
        self.work.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::Full,
            mpsc::error::TrySendError::Closed(_) => BrokerError::Stopped,
        })
    }
}

enum Delivery {
    Fresh(Message),
    Redelivery(Message),
}

/// A request waiting for a reply, bound to the connection that sent it
#[derive(Debug, Clone, PartialEq, Eq)]
struct Waiting {
    identity: String,
    connection: u64,
}

/// The broker loop. Sole owner of the router socket.
///
/// Each worker request carries the id of the message the worker finished
/// last; that id is discarded from the pending queue right away and the
/// worker joins the idle line. Whenever someone is idle, redeliveries are
/// served before fresh work. Every message goes into the pending queue
/// before it is written to the worker, so a fast ack always finds it.
///
/// A reply only goes to the connection that asked for it. When a worker
/// reconnects, a request still parked from its old connection is void.
pub struct Dispatcher {
    router: RouterSocket,
    queue: Arc<PendingQueue>,
    redeliveries: mpsc::Receiver<Message>,
    work: mpsc::Receiver<Message>,
    idle: VecDeque<Waiting>,
    workers: Arc<WorkerRegistry>,
    metrics: Arc<BrokerMetrics>,
}

impl Dispatcher {
    pub fn new(
        router: RouterSocket,
        queue: Arc<PendingQueue>,
        redeliveries: mpsc::Receiver<Message>,
        work: mpsc::Receiver<Message>,
        workers: Arc<WorkerRegistry>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Dispatcher {
            router,
            queue,
            redeliveries,
            work,
            idle: VecDeque::new(),
            workers,
            metrics,
        }
    }

    /// Serve worker requests until cancelled. Only a closed router ends the
    /// loop with an error; a failed exchange is logged and skipped.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let ready = !self.idle.is_empty();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(message) = self.redeliveries.recv(), if ready => {
                    self.dispatch(Delivery::Redelivery(message));
                }
                Some(message) = self.work.recv(), if ready => {
                    self.dispatch(Delivery::Fresh(message));
                }
                inbound = self.router.recv() => match inbound {
                    Ok(envelope) => self.handle_request(envelope),
                    Err(ProtocolError::Closed) => {
                        error!("Router closed, stopping dispatcher");
                        return Err(BrokerError::Transport(ProtocolError::Closed));
                    }
                    Err(e) => {
                        warn!("Failed to receive worker request: {}", e);
                        self.metrics.exchange_errors.inc();
                    }
                },
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Move anything still sitting in the hand-off channels into the pending
    /// queue. Call once the scanner has stopped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(message) = self.redeliveries.try_recv() {
            drained += usize::from(self.queue.push(message));
        }
        while let Ok(message) = self.work.try_recv() {
            drained += usize::from(self.queue.push(message));
        }
        if drained > 0 {
            info!("Moved {} undelivered messages into the pending queue", drained);
        }
        self.update_depth();
        drained
    }

    /// Workers waiting for a message
    pub fn idle_workers(&self) -> usize {
        self.idle.len()
    }

    fn handle_request(&mut self, envelope: RoutedEnvelope) {
        let RoutedEnvelope {
            identity,
            connection,
            frames,
        } = envelope;

        let ack = match parse_request(&frames) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Dropping malformed request from {}: {}", identity, e);
                self.metrics.exchange_errors.inc();
                return;
            }
        };

        if self.workers.record_request(&identity, ack) {
            info!("Worker {} connected", identity);
            self.metrics.workers_known.set(self.workers.count() as i64);
        }

        if ack.is_valid() {
            let matched = self.queue.discard(ack);
            self.metrics.observe_ack(matched);
            if matched {
                debug!("Worker {} acknowledged message {}", identity, ack);
            } else {
                debug!("Ack {} from {} matched nothing pending", ack, identity);
            }
        }

        let before = self.idle.len();
        self.idle.retain(|w| w.identity != identity || w.connection == connection);
        if self.idle.len() < before {
            debug!("Dropped stale request from {} after reconnect", identity);
        }

        let waiting = Waiting {
            identity,
            connection,
        };
        if self.idle.contains(&waiting) {
            debug!("Worker {} is already waiting", waiting.identity);
        } else {
            self.idle.push_back(waiting);
        }
        self.update_depth();
    }

    fn dispatch(&mut self, delivery: Delivery) {
        let (message, redelivered) = match delivery {
            Delivery::Fresh(message) => (message, false),
            Delivery::Redelivery(message) => (message.renewed(), true),
        };

        if !self.queue.push(message.clone()) {
            warn!("Ignoring message with reserved id {}", message.id);
            return;
        }

        if redelivered {
            self.metrics.messages_redelivered.inc();
            match self.workers.holder_of(message.id) {
                Some(holder) => info!("Redelivering message {} (last held by {})", message.id, holder),
                None => info!("Redelivering message {}", message.id),
            }
        } else {
            self.metrics.messages_pushed.inc();
        }

        let frames = match reply_frames(&message) {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to encode message {}: {}", message.id, e);
                self.metrics.exchange_errors.inc();
                self.update_depth();
                return;
            }
        };

        let mut delivered = false;
        while let Some(Waiting {
            identity,
            connection,
        }) = self.idle.pop_front()
        {
            match self.router.send_to(&identity, connection, frames.clone()) {
                Ok(()) => {
                    debug!("Sent message {} to {}", message.id, identity);
                    self.workers.record_delivery(&identity, message.id);
                    self.metrics.messages_delivered.inc();
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!("Could not reach worker {}: {}", identity, e);
                    self.metrics.exchange_errors.inc();
                }
            }
        }

        if !delivered {
            debug!("No reachable worker for message {}, leaving it pending", message.id);
        }
        self.update_depth();
    }

    fn update_depth(&self) {
        self.metrics.pending_depth.set(self.queue.len() as i64);
    }
}
