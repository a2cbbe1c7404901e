//! Host-liveness flags shared by the catalog processors and the daemon.

use serde::{Deserialize, Serialize};

/// Heartbeat-derived liveness windows.
///
/// A host is *online* while its last heartbeat is within
/// `heartbeat_interval_secs * expired_time_factor`, *offline* beyond that but
/// within `removed_threshold_sec`, and garbage-collectable past the
/// threshold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LivenessFlags {
    pub heartbeat_interval_secs: u64,
    pub expired_time_factor: u64,
    pub removed_threshold_sec: u64,
}

impl Default for LivenessFlags {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            expired_time_factor: 2,
            removed_threshold_sec: 24 * 60 * 60,
        }
    }
}

impl LivenessFlags {
    /// Milliseconds a host may go without a heartbeat and still be online.
    pub fn online_window_ms(&self) -> i64 {
        (self.heartbeat_interval_secs * self.expired_time_factor * 1000) as i64
    }

    /// Milliseconds after which an offline host is removed from the catalog.
    pub fn removed_window_ms(&self) -> i64 {
        (self.removed_threshold_sec * 1000) as i64
    }
}
