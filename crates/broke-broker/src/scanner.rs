use broke_core::{Message, PendingQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically evicts the oldest expired message and hands it to the
/// dispatcher for another delivery attempt.
///
/// One message per tick at most, on a fixed cadence. A burst of expiries
/// (say, after a worker crash) is therefore spread over several ticks.
/// Staleness is judged by message age alone: a slow worker and a dead one
/// look the same from here.
pub struct TimeoutScanner {
    queue: Arc<PendingQueue>,
    interval: Duration,
    redeliver: mpsc::Sender<Message>,
}

impl TimeoutScanner {
    pub fn new(queue: Arc<PendingQueue>, interval: Duration, redeliver: mpsc::Sender<Message>) -> Self {
        TimeoutScanner {
            queue,
            interval,
            redeliver,
        }
    }

    /// Scan every `interval` until cancelled or the dispatcher goes away
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(message) = self.queue.purge_one(self.interval) else {
                        continue;
                    };
                    debug!("Message {} expired, handing over for redelivery", message.id);

                    if !self.hand_over(message, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!("Timeout scanner stopped");
    }

    /// Pass an evicted message to the dispatcher. If that cannot happen the
    /// message goes back into the queue so it is not lost; returns false when
    /// the scanner should stop.
    async fn hand_over(&self, message: Message, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.queue.push(message);
                false
            }
            permit = self.redeliver.reserve() => match permit {
                Ok(permit) => {
                    permit.send(message);
                    true
                }
                Err(_) => {
                    self.queue.push(message);
                    false
                }
            },
        }
    }
}
