use broke_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl WorkerError {
    /// Whether reconnecting might help
    pub fn is_disconnect(&self) -> bool {
        match self {
            WorkerError::Protocol(e) => e.is_disconnect(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
