//! Basic type definitions for the hub
//!
//! Provides newtype wrappers and id helpers:
//! - `ConnectionId`: UUID-based unique connection identifier
//! - `generate_message_id`: time-based message id with a random suffix
//! - `now_timestamp`: hub-local RFC 3339 clock

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe connection identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a message id of the form `msg_<unix-nanos>_<random>`
///
/// Ordering is only meaningful within one process; the random suffix
/// disambiguates ids generated in the same nanosecond.
pub fn generate_message_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen_range(0..i64::MAX as u64);
    format!("msg_{}_{}", nanos, suffix)
}

/// Current hub-local time as an RFC 3339 UTC string
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
