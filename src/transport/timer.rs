//! Retransmission timers keyed by connection.
//!
//! At most one deadline exists per [`ConnectionId`]. Arming replaces any
//! earlier deadline for the same key and cancelling removes it, so a timer
//! that was superseded can never fire. The driver asks for
//! [`next_deadline`](RetransmitTimers::next_deadline), sleeps until then and
//! collects what [`expire`](RetransmitTimers::expire) returns.

use std::collections::HashMap;
use std::time::Instant;

use super::connection::ConnectionId;

/// Pending retransmission deadlines, one per connection.
#[derive(Debug, Default)]
pub struct RetransmitTimers {
    deadlines: HashMap<ConnectionId, Instant>,
}

impl RetransmitTimers {
    /// Create an empty timer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer for `id`, replacing any pending one.
    pub fn arm(&mut self, id: ConnectionId, deadline: Instant) {
        if self.deadlines.insert(id, deadline).is_some() {
            log::trace!("{id}: retransmission timer re-armed");
        }
    }

    /// Cancel the timer for `id`. Returns `true` if one was pending.
    pub fn cancel(&mut self, id: &ConnectionId) -> bool {
        self.deadlines.remove(id).is_some()
    }

    /// Check if a timer is pending for `id`.
    pub fn is_armed(&self, id: &ConnectionId) -> bool {
        self.deadlines.contains_key(id)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<ConnectionId> {
        let mut due: Vec<(Instant, ConnectionId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        due.sort();

        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Check if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
