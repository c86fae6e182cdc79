//! Hub statistics
//!
//! Counters are written only by the hub actor and read lock-free by anyone
//! holding a `HubHandle`. Snapshots may lag a few events behind.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Live counters
#[derive(Debug, Default)]
pub struct Stats {
    active_connections: AtomicUsize,
    total_connections: AtomicU64,
    total_messages: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_messages: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration; `active` is the registry size afterwards
    pub(crate) fn connection_opened(&self, active: usize) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.store(active, Ordering::Relaxed);
    }

    /// Record the registry size after removals
    pub(crate) fn set_active(&self, active: usize) {
        self.active_connections.store(active, Ordering::Relaxed);
    }

    pub(crate) fn message_sent(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.connection_opened(1);
        stats.connection_opened(2);
        stats.set_active(1);
        stats.message_sent();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                active_connections: 1,
                total_connections: 2,
                total_messages: 1,
            }
        );
    }

    #[test]
    fn test_snapshot_serialize() {
        let json = serde_json::to_string(&Stats::new().snapshot()).unwrap();
        assert!(json.contains("\"active_connections\":0"));
        assert!(json.contains("\"total_connections\":0"));
        assert!(json.contains("\"total_messages\":0"));
    }
}
