use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
