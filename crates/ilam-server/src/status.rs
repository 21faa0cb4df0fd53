//! `GET /` status snapshot.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Server statistics, recomputed per request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusSnapshot {
    /// Seconds since the server started.
    pub up_time: i32,
    /// Live connection count.
    pub connections: i32,
    /// Server version.
    pub version: String,
}

/// Build a snapshot from live counters. Both counts saturate at `i32::MAX`.
pub fn status_snapshot(started_at: Instant, connections: usize) -> StatusSnapshot {
    StatusSnapshot {
        up_time: i32::try_from(started_at.elapsed().as_secs()).unwrap_or(i32::MAX),
        connections: i32::try_from(connections).unwrap_or(i32::MAX),
        version: ilam_core::constants::VERSION.to_string(),
    }
}
