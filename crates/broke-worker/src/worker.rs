use crate::client::WorkerClient;
use crate::handler::MessageHandler;
use crate::Result;
use broke_core::Message;
use broke_protocol::Endpoint;

use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Drives one `WorkerClient`: receive, handle, repeat.
pub struct Worker {
    identity: String,
    endpoint: Endpoint,
    handler: Arc<dyn MessageHandler>,
    reconnect_interval: Duration,
}

impl Worker {
    pub fn new(
        identity: impl Into<String>,
        endpoint: Endpoint,
        handler: Arc<dyn MessageHandler>,
        reconnect_interval: Duration,
    ) -> Self {
        Worker {
            identity: identity.into(),
            endpoint,
            handler,
            reconnect_interval,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Run until cancelled and return how many messages were handled.
    ///
    /// A lost or refused connection is retried every `reconnect_interval`.
    /// A handler failure abandons the message so the broker sends it again
    /// after its redelivery interval.
    pub async fn run(&self, cancel: CancellationToken) -> Result<u64> {
        let Some(mut client) = self.connect(&cancel).await? else {
            return Ok(0);
        };
        info!("Worker {} ready on {}", self.identity, self.endpoint);

        let mut handled = 0;
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = client.announce_and_receive() => received,
            };

            match received {
                Ok(message) => {
                    if self.process(&mut client, &message).await {
                        handled += 1;
                    }
                }
                Err(e) if e.is_disconnect() => {
                    warn!("Worker {} lost the broker: {}", self.identity, e);
                    if !self.reconnect(&mut client, &cancel).await? {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Worker {} exchange failed: {}", self.identity, e);
                }
            }
        }

        info!("Worker {} stopped after {} messages", self.identity, handled);
        Ok(handled)
    }

    async fn process(&self, client: &mut WorkerClient, message: &Message) -> bool {
        match self.handler.handle(&self.identity, message).await {
            Ok(()) => true,
            Err(reason) => {
                let abandoned = client.abandon();
                warn!(
                    "Worker {} failed message {}: {}; leaving it for redelivery",
                    self.identity, abandoned, reason
                );
                false
            }
        }
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<Option<WorkerClient>> {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                attempt = WorkerClient::connect(&self.endpoint, self.identity.clone()) => attempt,
            };

            match attempt {
                Ok(client) => return Ok(Some(client)),
                Err(e) if e.is_disconnect() => {
                    warn!(
                        "Worker {} cannot reach {}: {}; retrying in {:?}",
                        self.identity, self.endpoint, e, self.reconnect_interval
                    );
                    if !self.pause(cancel).await {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns false when cancelled before a connection came back
    async fn reconnect(&self, client: &mut WorkerClient, cancel: &CancellationToken) -> Result<bool> {
        loop {
            if !self.pause(cancel).await {
                return Ok(false);
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                attempt = client.reconnect() => attempt,
            };

            match attempt {
                Ok(()) => {
                    info!("Worker {} reconnected to {}", self.identity, self.endpoint);
                    return Ok(true);
                }
                Err(e) if e.is_disconnect() => {
                    warn!(
                        "Worker {} cannot reach {}: {}; retrying in {:?}",
                        self.identity, self.endpoint, e, self.reconnect_interval
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_interval) => true,
        }
    }
}
