//! Connection registry record
//!
//! Represents a live peer as seen by the hub: identity, room, groups,
//! outbound queue and lifecycle state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::EnqueueError;
use crate::message::Message;
use crate::types::ConnectionId;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, not yet registered with the hub
    Connecting = 0,
    /// Registered and serving
    Active = 1,
    /// Removal decided, pumps still winding down
    Draining = 2,
    /// Both pumps exited, transport released
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared lifecycle state
///
/// One copy lives in the hub's registry record, the other with the
/// connection handler. Transitions only move forward.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Connecting -> Active. Returns false if the connection already moved on.
    pub fn activate(&self) -> bool {
        self.advance(ConnectionState::Connecting, ConnectionState::Active)
    }

    /// Connecting/Active -> Draining
    ///
    /// Returns true only for the caller that performed the transition, so the
    /// drain sequence runs once per connection.
    pub fn begin_drain(&self) -> bool {
        self.advance(ConnectionState::Active, ConnectionState::Draining)
            || self.advance(ConnectionState::Connecting, ConnectionState::Draining)
    }

    /// Any state -> Closed
    pub fn close(&self) {
        self.0
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered peer
///
/// Owned by the hub. The outbound sender is the only producer handle for the
/// connection's queue; dropping it closes the queue and lets the writer pump
/// finish.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Identity (None until the peer identifies itself)
    pub identity: Option<String>,
    /// Room label, empty means no room
    pub room: String,
    /// Groups this connection belongs to
    pub groups: HashSet<String>,
    /// Hub -> writer queue, None once closed
    outbound: Option<mpsc::Sender<Arc<Message>>>,
    /// Lifecycle state shared with the handler
    pub state: StateCell,
}

impl Connection {
    /// Create an anonymous connection
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Arc<Message>>, state: StateCell) -> Self {
        Self {
            id,
            identity: None,
            room: String::new(),
            groups: HashSet::new(),
            outbound: Some(outbound),
            state,
        }
    }

    /// Attach an identity and room known at handshake time
    pub fn with_identity(mut self, identity: impl Into<String>, room: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self.room = room.into();
        self
    }

    /// Get the display name for this connection
    ///
    /// Returns the identity if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.identity.as_deref().unwrap_or("Unknown")
    }

    /// Check if this connection has identified itself
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Bind identity and room
    pub fn set_identity(&mut self, identity: String, room: String) {
        self.identity = Some(identity);
        self.room = room;
    }

    /// Enqueue without waiting
    pub fn try_enqueue(&self, message: Arc<Message>) -> Result<(), EnqueueError> {
        let Some(outbound) = &self.outbound else {
            return Err(EnqueueError::Closed);
        };
        outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue; later enqueue attempts fail with `Closed`
    pub fn close_outbound(&mut self) {
        self.outbound = None;
    }

    #[cfg(test)]
    fn is_outbound_closed(&self) -> bool {
        self.outbound.is_none()
    }
}
