use broke_core::MessageId;
use broke_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Message id {0} is reserved and cannot be dispatched")]
    InvalidMessage(MessageId),

    #[error("Broker has stopped accepting messages")]
    Stopped,

    #[error("Work channel is full")]
    Full,

    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
