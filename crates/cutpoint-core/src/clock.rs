//! Lamport logical clock.
//!
//! # Invariants
//!
//! - Monotonicity: `time` never decreases
//! - `update(t)` with `t <= time` leaves the clock unchanged
//!
//! The clock itself is not synchronized. Its owner serializes access so that
//! the periodic event task and concurrent receive handlers never lose an
//! update.

/// Lamport clock owned by a single process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    /// A clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Advance for a local or send event.
    pub fn increment(&mut self) -> u64 {
        self.time = self.time.saturating_add(1);
        self.time
    }

    /// Merge a received timestamp.
    pub fn update(&mut self, received: u64) -> u64 {
        self.time = self.time.max(received);
        self.time
    }
}
