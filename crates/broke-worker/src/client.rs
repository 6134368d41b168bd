use crate::Result;
use broke_core::{Message, MessageId};
use broke_protocol::{parse_reply, request_frames, DealerSocket, Endpoint};
use tracing::debug;

/// Worker side of the exchange with the broker.
///
/// Every request for work carries the id of the message received last, which
/// is how the broker learns that message was handled.
pub struct WorkerClient {
    endpoint: Endpoint,
    socket: DealerSocket,
    last_ack: MessageId,
}

impl WorkerClient {
    /// Connect to the broker at `endpoint` as `identity`. The identity must be
    /// unique among the broker's workers.
    pub async fn connect(endpoint: &Endpoint, identity: impl Into<String>) -> Result<Self> {
        let socket = DealerSocket::connect(endpoint, identity).await?;
        debug!("Worker {} connected to {}", socket.identity(), endpoint);

        Ok(WorkerClient {
            endpoint: endpoint.clone(),
            socket,
            last_ack: MessageId::INVALID,
        })
    }

    /// Acknowledge the previous message and wait for the next one.
    ///
    /// On failure the ack is kept, so the next call reports the same id again.
    pub async fn announce_and_receive(&mut self) -> Result<Message> {
        self.socket.send(request_frames(self.last_ack)).await?;
        let frames = self.socket.recv().await?;
        let message = parse_reply(&frames)?;

        self.last_ack = message.id;
        Ok(message)
    }

    /// Forget the message received last so it is never acknowledged. The
    /// broker redelivers it once it times out. Returns the forgotten id.
    pub fn abandon(&mut self) -> MessageId {
        std::mem::replace(&mut self.last_ack, MessageId::INVALID)
    }

    /// Replace the connection with a fresh one under the same identity. The
    /// pending ack survives.
    pub async fn reconnect(&mut self) -> Result<()> {
        let identity = self.socket.identity().to_string();
        self.socket = DealerSocket::connect(&self.endpoint, identity).await?;
        debug!("Worker {} reconnected to {}", self.socket.identity(), self.endpoint);
        Ok(())
    }

    pub fn identity(&self) -> &str {
        self.socket.identity()
    }

    pub fn last_ack(&self) -> MessageId {
        self.last_ack
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
