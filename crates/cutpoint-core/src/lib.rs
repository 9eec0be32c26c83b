//! Cutpoint core.
//!
//! Pure state machines for the three algorithms a cutpoint process runs, plus
//! the seams a runtime plugs into:
//!
//! - [`clock::LamportClock`]: causal ordering of events
//! - [`election::Election`]: Bully and Ring leader election
//! - [`snapshot::SnapshotState`]: Chandy-Lamport global snapshots
//! - [`env::Environment`]: time, so simulations run on a virtual clock
//! - [`transport::Transport`]: one-message-per-connection point-to-point links
//!
//! State machines never perform I/O. Each operation returns a list of actions
//! (send this, wait for that, report this outcome) for the runtime to execute,
//! and timeouts come back in as ordinary method calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod election;
pub mod env;
pub mod snapshot;
pub mod transport;

pub use cutpoint_proto as proto;
