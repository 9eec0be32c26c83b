//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the process runtime from wall-clock
//! time. The production implementation uses the OS clock; the simulation
//! harness uses turmoil's virtual clock so that multi-second failure
//! detection and election timeouts run instantly and reproducibly.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// Subsequent calls must return times `>=` previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only runtime code sleeps. State machines receive timeouts as events.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
