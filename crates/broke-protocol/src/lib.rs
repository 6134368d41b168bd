mod endpoint;
mod codec;
mod inproc;
mod socket;
mod wire;

pub use endpoint::Endpoint;
pub use codec::{Envelope, EnvelopeCodec};
pub use socket::{DealerSocket, RoutedEnvelope, RouterSocket};
pub use wire::{parse_reply, parse_request, reply_frames, request_frames};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Envelope too large: {0} bytes")]
    EnvelopeTooLarge(usize),

    #[error("Too many frames in envelope: {0}")]
    TooManyFrames(usize),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decode error: {0}")]
    Decode(#[from] broke_core::CoreError),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the underlying connection is gone and must be re-established
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Closed => true,
            ProtocolError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum encoded envelope size: 16MB
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;
