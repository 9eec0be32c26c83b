//! Runtime error types.

use cutpoint_core::transport::TransportError;
use cutpoint_proto::Address;
use thiserror::Error;

use crate::process::Lifecycle;

/// Errors returned by [`crate::Process`] operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Operation is not allowed in the current lifecycle state.
    ///
    /// Covers starting twice, stopping a process that never ran, and any
    /// trigger on a stopped process.
    #[error("cannot {operation} a process that is {state}")]
    InvalidLifecycle {
        /// Operation that was attempted
        operation: &'static str,
        /// State the process was in
        state: Lifecycle,
    },

    /// Snapshot was initiated on a process other than the configured
    /// snapshot coordinator.
    #[error("only {coordinator} may initiate snapshots")]
    NotSnapshotCoordinator {
        /// Configured coordinator address
        coordinator: Address,
    },

    /// Configuration rejected by validation
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
