//! Model-based property tests.
//!
//! Random interleavings of local events and deliveries run against the core
//! state machines, with the test choosing every delivery. Each property
//! settles the cluster and checks the outcome every run must reach.

use cutpoint_harness::{ModelCluster, Operation};
use cutpoint_proto::ProcessId;
use proptest::prelude::*;

/// Local events and deliveries only.
fn traffic_strategy(size: usize) -> impl Strategy<Value = Operation> {
    let node = 0..size as u8;

    prop_oneof![
        2 => node.clone().prop_map(|node| Operation::Tick { node }),
        5 => (node.clone(), node).prop_map(|(from, to)| Operation::Deliver { from, to }),
    ]
}

/// Any operation, with indices left unclamped.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    let node = any::<u8>();

    prop_oneof![
        4 => node.prop_map(|node| Operation::Tick { node }),
        8 => (node, node).prop_map(|(from, to)| Operation::Deliver { from, to }),
        1 => node.prop_map(|node| Operation::InitiateSnapshot { node }),
        1 => node.prop_map(|node| Operation::TriggerBully { node }),
        1 => node.prop_map(|node| Operation::TriggerRing { node }),
        1 => Just(Operation::FireTimeout),
    ]
}

/// Kill every member whose flag is false, except `keep`.
fn kill_all_but(cluster: &mut ModelCluster, alive: &[bool], keep: usize) -> Vec<ProcessId> {
    for (index, &up) in alive.iter().enumerate().take(cluster.len()) {
        if !up && index != keep {
            cluster.kill(index);
        }
    }
    (0..cluster.len()).filter(|&i| cluster.is_alive(i)).map(|i| cluster.id(i)).collect()
}

proptest! {
    /// A snapshot taken at any point of any interleaving accounts for every
    /// `APP` message exactly once.
    #[test]
    fn prop_snapshot_conserves_messages(
        size in 2..=4usize,
        initiator in 0..4usize,
        before in prop::collection::vec(traffic_strategy(4), 0..60),
        after in prop::collection::vec(traffic_strategy(4), 0..60),
    ) {
        let mut cluster = ModelCluster::new(size);
        let initiator = initiator % size;

        for op in before {
            cluster.apply(op);
        }
        prop_assert!(cluster.initiate_snapshot(initiator));
        for op in after {
            cluster.apply(op);
        }
        prop_assert!(cluster.settle());

        prop_assert!(cluster.violations().is_empty(), "{:?}", cluster.violations());
        prop_assert_eq!(cluster.assembled().len(), 1);

        let global = &cluster.assembled()[0];
        prop_assert_eq!(global.initiator.clone(), cluster.address(initiator).clone());
        prop_assert_eq!(global.len(), size);
        if let Err(reason) = cluster.check_snapshot(global) {
            prop_assert!(false, "inconsistent cut: {}", reason);
        }

        for index in 0..size {
            prop_assert!(!cluster.snapshot_active(index), "member {} still active", index);
        }
    }

    /// A second initiation while a round is open is refused.
    #[test]
    fn prop_one_round_at_a_time(
        size in 2..=4usize,
        ops in prop::collection::vec(traffic_strategy(4), 0..30),
    ) {
        let mut cluster = ModelCluster::new(size);
        for op in ops {
            cluster.apply(op);
        }

        prop_assert!(cluster.initiate_snapshot(0));
        prop_assert!(!cluster.initiate_snapshot(0));
        prop_assert!(cluster.settle());
        prop_assert_eq!(cluster.assembled().len(), 1);
        prop_assert!(cluster.initiate_snapshot(0));
    }

    /// The ring token visits every live member once, in ring order from the
    /// initiator, and everyone alive adopts the highest live id.
    #[test]
    fn prop_ring_elects_highest_alive(
        size in 1..=6usize,
        initiator in 0..6usize,
        alive in prop::collection::vec(any::<bool>(), 6),
    ) {
        let mut cluster = ModelCluster::new(size);
        let initiator = initiator % size;
        let live = kill_all_but(&mut cluster, &alive, initiator);
        let highest = live.iter().copied().max().unwrap_or_default();

        cluster.trigger_ring(initiator);
        prop_assert!(cluster.settle());

        let start = cluster.id(initiator);
        let expected: Vec<ProcessId> = live
            .iter()
            .copied()
            .filter(|&id| id >= start)
            .chain(live.iter().copied().filter(|&id| id < start))
            .collect();
        prop_assert_eq!(cluster.token_returns(), &[expected][..]);

        for index in (0..size).filter(|&i| cluster.is_alive(i)) {
            prop_assert_eq!(cluster.coordinator(index), highest);
        }
    }

    /// Exactly one member wins a Bully election: the highest live id.
    #[test]
    fn prop_bully_elects_highest_alive(
        size in 1..=6usize,
        trigger in 0..6usize,
        alive in prop::collection::vec(any::<bool>(), 6),
    ) {
        let mut cluster = ModelCluster::new(size);
        let trigger = trigger % size;
        let live = kill_all_but(&mut cluster, &alive, trigger);
        let highest = live.iter().copied().max().unwrap_or_default();

        cluster.trigger_bully(trigger);
        prop_assert!(cluster.settle());

        prop_assert_eq!(cluster.elected(), &[highest][..]);
        for index in (0..size).filter(|&i| cluster.is_alive(i)) {
            prop_assert_eq!(cluster.coordinator(index), highest);
        }
    }

    /// Killing the ring initiator at any point of a round still lets the
    /// survivors go quiet.
    #[test]
    fn prop_ring_settles_after_initiator_dies(
        size in 2..=6usize,
        initiator in 0..6usize,
        steps in prop::collection::vec(traffic_strategy(6), 0..20),
    ) {
        let mut cluster = ModelCluster::new(size);
        let initiator = initiator % size;

        prop_assert!(cluster.trigger_ring(initiator));
        for op in steps.into_iter().filter(|op| matches!(op, Operation::Deliver { .. })) {
            cluster.apply(op);
        }
        cluster.kill(initiator);

        prop_assert!(cluster.settle(), "ring message still circulating");
        prop_assert!(cluster.violations().is_empty(), "{:?}", cluster.violations());
        prop_assert!(cluster.token_returns().len() <= 1);
    }

    /// Crashed peers never leave the survivors stuck in a snapshot round.
    #[test]
    fn prop_snapshot_survives_crashed_peers(
        size in 2..=5usize,
        initiator in 0..5usize,
        alive in prop::collection::vec(any::<bool>(), 5),
        traffic in prop::collection::vec(traffic_strategy(5), 0..30),
    ) {
        let mut cluster = ModelCluster::new(size);
        let initiator = initiator % size;
        let live = kill_all_but(&mut cluster, &alive, initiator);

        prop_assert!(cluster.initiate_snapshot(initiator));
        for op in traffic {
            cluster.apply(op);
        }
        prop_assert!(cluster.settle());

        let expected = usize::from(live.len() == size);
        prop_assert_eq!(cluster.assembled().len(), expected);
        for index in 0..size {
            prop_assert!(!cluster.snapshot_active(index), "member {} still active", index);
        }
        prop_assert!(cluster.initiate_snapshot(initiator));
    }

    /// Arbitrary operation sequences never trip a state machine.
    #[test]
    fn prop_arbitrary_operations_stay_consistent(
        size in 1..=5usize,
        ops in prop::collection::vec(operation_strategy(), 0..200),
    ) {
        let mut cluster = ModelCluster::new(size);
        for op in ops {
            cluster.apply(op);
        }
        prop_assert!(cluster.settle());
        prop_assert!(cluster.violations().is_empty(), "{:?}", cluster.violations());
    }
}

#[test]
fn ring_skips_crashed_members() {
    let mut cluster = ModelCluster::new(5);
    cluster.kill(3);
    cluster.kill(4);

    assert!(cluster.trigger_ring(0));
    assert!(cluster.settle());

    assert_eq!(cluster.token_returns(), &[vec![1, 2, 3]][..]);
    assert_eq!(cluster.elected(), &[] as &[ProcessId]);
    assert!((0..3).all(|i| cluster.coordinator(i) == 3));
}

#[test]
fn ring_token_dies_with_its_initiator() {
    let mut cluster = ModelCluster::new(3);
    assert!(cluster.trigger_ring(0));
    cluster.kill(0);

    assert!(cluster.settle());
    assert!(cluster.token_returns().is_empty());
    assert_eq!(cluster.in_flight(), 0);
    assert_eq!(cluster.coordinator(1), 3);
}

#[test]
fn ring_announcement_stops_at_dead_initiator() {
    let mut cluster = ModelCluster::new(4);
    assert!(cluster.trigger_ring(0));
    for (from, to) in [(0, 1), (1, 2), (2, 3), (3, 0)] {
        assert!(cluster.deliver(from, to));
    }
    assert_eq!(cluster.token_returns(), &[vec![1, 2, 3, 4]][..]);

    cluster.kill(0);
    assert!(cluster.settle());
    assert!((1..4).all(|i| cluster.coordinator(i) == 4));
    assert_eq!(cluster.in_flight(), 0);
}

#[test]
fn snapshot_with_crashed_peer_is_abandoned() {
    let mut cluster = ModelCluster::new(3);
    cluster.kill(2);
    cluster.tick(0);

    assert!(cluster.initiate_snapshot(0));
    assert!(cluster.settle());

    assert!(cluster.assembled().is_empty());
    assert!(cluster.abandoned() >= 1);
    assert!(!cluster.snapshot_active(0));
    assert!(!cluster.snapshot_active(1));
    assert!(cluster.initiate_snapshot(0));
}

#[test]
fn bully_survives_coordinator_crash() {
    let mut cluster = ModelCluster::new(3);
    cluster.kill(2);

    assert!(cluster.trigger_bully(0));
    assert!(cluster.settle());

    assert_eq!(cluster.elected(), &[2][..]);
    assert_eq!(cluster.coordinator(0), 2);
    assert_eq!(cluster.coordinator(1), 2);
}

#[test]
fn snapshot_records_message_in_flight_across_cut() {
    let mut cluster = ModelCluster::new(2);
    cluster.tick(1);

    // node-1's APP is still queued when node-0 captures
    assert!(cluster.initiate_snapshot(0));
    assert!(cluster.settle());

    let global = &cluster.assembled()[0];
    assert_eq!(global.channel(cluster.address(1), cluster.address(0)).len(), 1);
    assert_eq!(global.in_flight(), 1);
    cluster.check_snapshot(global).expect("consistent cut");
}
