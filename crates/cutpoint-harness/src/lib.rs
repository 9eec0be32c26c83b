//! Deterministic simulation harness for cutpoint.
//!
//! Turmoil-based implementations of the `Environment` and `Transport` traits
//! run real [`cutpoint_node::Process`] instances on a simulated network with
//! a virtual clock. Multi-second detection intervals and election timeouts
//! complete instantly, and every run with the same seed is identical.
//!
//! # Model-Based Testing
//!
//! The `model` module drives the core state machines directly over in-memory
//! FIFO channels, with the test choosing every delivery. Property tests use it
//! to explore interleavings no timed simulation would hit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use model::{Cut, ModelCluster, NodeIndex, Operation};
pub use scenario::{EventLog, SimProcess, host_name, identities, run_member, sim_process};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
