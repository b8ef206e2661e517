//! Attempt identity and the current-attempt slot
//!
//! Every session attempt gets a strictly increasing [`AttemptId`]. The
//! supervisor keeps at most one attempt live; events tagged with any other id
//! are stale and must be dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tracks which attempt, if any, currently owns the session
#[derive(Debug, Default)]
pub struct AttemptSlot {
    last_issued: u64,
    live: Option<AttemptId>,
}

impl AttemptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id and make it the live attempt
    pub fn begin(&mut self) -> AttemptId {
        self.last_issued += 1;
        let id = AttemptId(self.last_issued);
        self.live = Some(id);
        id
    }

    /// The live attempt stops accepting events (closed or discarded)
    pub fn retire(&mut self, id: AttemptId) {
        if self.live == Some(id) {
            self.live = None;
        }
    }

    pub fn live(&self) -> Option<AttemptId> {
        self.live
    }

    /// Whether an event produced by `id` may be handled
    pub fn accepts(&self, id: AttemptId) -> bool {
        self.live == Some(id)
    }

    pub fn attempts_started(&self) -> u64 {
        self.last_issued
    }
}

/// Passed to `on_connected` when a session opens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedSession {
    pub attempt: AttemptId,
    /// Account id from the credentials, when the session layer provided one
    pub user: Option<String>,
    pub connected_at: DateTime<Utc>,
}
