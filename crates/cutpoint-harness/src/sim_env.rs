//! Simulated environment on turmoil's virtual clock.

use std::time::{Duration, Instant};

use cutpoint_core::env::Environment;

/// Environment whose time is turmoil's simulated time.
///
/// Must be used inside a turmoil host or client, where tokio's clock is
/// driven by the simulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a simulated environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
