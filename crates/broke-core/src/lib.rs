mod message;
mod queue;
mod error;

pub use message::{Message, MessageId};
pub use queue::PendingQueue;
pub use error::{CoreError, Result};
