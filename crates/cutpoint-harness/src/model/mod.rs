//! In-memory cluster model for property tests.
//!
//! The model runs the core state machines of every member directly, with
//! one FIFO queue per ordered pair of members standing in for the network.
//! Nothing is delivered until an [`Operation`] says so, which lets proptest
//! pick the interleaving of local events, deliveries and triggers.
//!
//! # Design Principles
//!
//! - Same state machines as the runtime: only I/O is replaced
//! - FIFO per channel, arbitrary order across channels
//! - Deterministic: same operations produce the same run

mod cluster;
pub mod operation;

pub use cluster::{Cut, ModelCluster};
pub use operation::{NodeIndex, Operation};
