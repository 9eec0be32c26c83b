//! Wall-clock environment for processes on real sockets.

use std::time::{Duration, Instant};

use cutpoint_core::env::Environment;

/// OS clock for `now`, tokio timers for `sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_never_goes_backwards() {
        let env = SystemEnv::new();
        let readings: Vec<_> = (0..100).map(|_| env.now()).collect();
        assert!(readings.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn sleep_covers_an_event_interval() {
        let env = SystemEnv::new();
        let interval = Duration::from_millis(20);

        let before = env.now();
        env.sleep(interval).await;

        assert!(env.now().duration_since(before) >= interval);
    }
}
