use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Identity of a message while it is in flight.
///
/// Zero is reserved: it means "no message" and is what a worker acknowledges
/// before it has received anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// The "nothing to acknowledge" sentinel.
    pub const INVALID: MessageId = MessageId(0);

    pub fn new(value: u64) -> Self {
        MessageId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses the decimal form used for acknowledgments. An empty string is the
/// sentinel.
impl FromStr for MessageId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(MessageId::INVALID);
        }
        trimmed
            .parse::<u64>()
            .map(MessageId)
            .map_err(|_| CoreError::InvalidId(s.to_string()))
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        MessageId(value)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// A unit of work handed from the broker to a worker.
///
/// Only `id` and `payload` cross the wire; `enqueued_at` is local to the
/// process that holds the message and drives redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "ID", default, skip_serializing_if = "MessageId::is_invalid")]
    pub id: MessageId,

    #[serde(rename = "msg", default, skip_serializing_if = "String::is_empty")]
    pub payload: String,

    #[serde(skip, default = "Instant::now")]
    pub enqueued_at: Instant,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(id: impl Into<MessageId>, payload: impl Into<String>) -> Self {
        Self::with_enqueued_at(id, payload, Instant::now())
    }

    /// Create a message with an explicit enqueue time
    pub fn with_enqueued_at(
        id: impl Into<MessageId>,
        payload: impl Into<String>,
        enqueued_at: Instant,
    ) -> Self {
        Message {
            id: id.into(),
            payload: payload.into(),
            enqueued_at,
        }
    }

    /// A copy with the same id and payload and a fresh timestamp, used when a
    /// message goes back into the queue after redelivery.
    pub fn renewed(&self) -> Self {
        Message::new(self.id, self.payload.clone())
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    /// Age of the message as seen at `now`. Saturates at zero if `now`
    /// predates the enqueue time.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    /// Whether at least `threshold` has elapsed since the message was enqueued
    pub fn timeout_reached(&self, threshold: Duration) -> bool {
        self.timeout_reached_at(threshold, Instant::now())
    }

    pub fn timeout_reached_at(&self, threshold: Duration, now: Instant) -> bool {
        self.age_at(now) >= threshold
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(CoreError::from)
    }

    /// Deserialize from the JSON wire form; the timestamp is set to now
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(CoreError::from)
    }
}

/// Equality covers what the message carries, not when it was enqueued.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.payload == other.payload
    }
}

impl Eq for Message {}
