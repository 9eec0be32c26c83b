//! Fuzz target for the cluster model
//!
//! Drives every core state machine through arbitrary interleavings of local
//! events, deliveries, snapshots, elections and timeouts.
//!
//! # Strategy
//!
//! - Cluster size 1-6, chosen by the input
//! - Operations: arbitrary [`Operation`] sequence; indices wrap
//! - Settle: deliver everything still queued, then fire timeouts
//!
//! # Invariants
//!
//! - NEVER panic, whatever the interleaving
//! - No state machine rejects a message the cluster produced
//! - A cluster always quiets down once operations stop
//! - The first assembled snapshot is a consistent cut when it is the only
//!   round that ran

#![no_main]

use arbitrary::Arbitrary;
use cutpoint_harness::{ModelCluster, Operation};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Run {
    size: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|run: Run| {
    let size = usize::from(run.size % 6) + 1;
    let mut cluster = ModelCluster::new(size);

    let mut initiations = 0;
    for operation in run.operations {
        if cluster.apply(operation) && matches!(operation, Operation::InitiateSnapshot { .. }) {
            initiations += 1;
        }
    }

    assert!(cluster.settle(), "cluster never quiets down");
    assert!(cluster.violations().is_empty(), "{:?}", cluster.violations());

    if initiations == 1 {
        let global = &cluster.assembled()[0];
        if let Err(reason) = cluster.check_snapshot(global) {
            panic!("inconsistent cut: {reason}");
        }
    }
});
