use async_trait::async_trait;
use broke_core::Message;
use std::time::Duration;
use tracing::info;

/// Result type for message handlers. An error means the message was not
/// processed and should be delivered again.
pub type HandlerResult = Result<(), String>;

/// Trait for message handlers
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, worker: &str, message: &Message) -> HandlerResult;
}

/// Logs every message it receives
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, worker: &str, message: &Message) -> HandlerResult {
        info!("Worker {} - message received: {} {:?}", worker, message.id, message.payload);
        Ok(())
    }
}

/// Logs the message, then simulates work
pub struct SleepHandler {
    duration: Duration,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler {
            duration: Duration::from_millis(duration_ms),
        }
    }
}

#[async_trait]
impl MessageHandler for SleepHandler {
    async fn handle(&self, worker: &str, message: &Message) -> HandlerResult {
        LogHandler.handle(worker, message).await?;
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_handler() {
        let result = LogHandler.handle("w", &Message::new(1, "Yo")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_handler_waits() {
        let handler = SleepHandler::new(30);
        let started = std::time::Instant::now();
        handler.handle("w", &Message::new(1, "Yo")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
