//! Scenario drivers for `cutpoint demo`.
//!
//! Each scenario builds a localhost cluster, injects failures on a fixed
//! schedule and logs the outcome. Processes log their own events.

use std::time::Duration;

use cutpoint_core::election::ElectionAlgorithm;
use cutpoint_node::{Lifecycle, NodeError, ProcessConfig, ProcessEvent, TcpProcess};
use cutpoint_proto::ProcessIdentity;
use tokio::sync::broadcast;

type DemoResult = Result<(), Box<dyn std::error::Error>>;

/// Identities `1..=size` on consecutive ports after `base_port`.
fn identities(base_port: u16, size: u16) -> Result<Vec<ProcessIdentity>, NodeError> {
    (1..=size)
        .map(|n| {
            let port = base_port.checked_add(n).ok_or_else(|| {
                NodeError::Config(format!("base port {base_port} leaves no room for {size} processes"))
            })?;
            Ok(ProcessIdentity::new(u64::from(n), format!("127.0.0.1:{port}")))
        })
        .collect()
}

fn cluster(
    members: &[ProcessIdentity],
    config: &ProcessConfig,
) -> Result<Vec<TcpProcess>, NodeError> {
    members
        .iter()
        .map(|identity| {
            let peers = members.iter().filter(|p| p.id != identity.id).cloned().collect();
            TcpProcess::over_tcp(identity.clone(), peers, config.clone())
        })
        .collect()
}

async fn start_all(processes: &[TcpProcess]) -> DemoResult {
    for process in processes {
        process.start().await?;
    }
    Ok(())
}

async fn stop_running(processes: &[TcpProcess]) -> DemoResult {
    for process in processes {
        if process.lifecycle() == Lifecycle::Running {
            process.stop().await?;
        }
    }
    Ok(())
}

/// Wait until `events` yields an event matching `want`, or `limit` passes.
async fn wait_for(
    events: &mut broadcast::Receiver<ProcessEvent>,
    limit: Duration,
    want: impl Fn(&ProcessEvent) -> bool,
) -> Option<ProcessEvent> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if want(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(limit, wait).await.ok().flatten()
}

async fn log_coordinators(processes: &[TcpProcess]) {
    for process in processes.iter().filter(|p| p.lifecycle() == Lifecycle::Running) {
        tracing::info!(
            "process {} believes the coordinator is {}",
            process.identity().id,
            process.coordinator_id().await
        );
    }
}

/// Three processes exchange events; process 1 snapshots after 8 seconds.
pub async fn snapshot(base_port: u16) -> DemoResult {
    let members = identities(base_port, 3)?;
    let config = ProcessConfig::default()
        .with_failure_detection(false)
        .with_snapshot_coordinator(members[0].address.clone());
    let processes = cluster(&members, &config)?;
    let mut events = processes[0].subscribe();

    start_all(&processes).await?;
    tokio::time::sleep(Duration::from_secs(8)).await;
    processes[0].initiate_snapshot().await?;

    let assembled = wait_for(&mut events, Duration::from_secs(10), |e| {
        matches!(e, ProcessEvent::GlobalSnapshotAssembled(_))
    })
    .await;
    if assembled.is_none() {
        tracing::warn!("global snapshot was not assembled within 10s");
    }

    stop_running(&processes).await
}

/// Three processes; process 3 is killed and the survivors elect process 2.
pub async fn bully(base_port: u16) -> DemoResult {
    let members = identities(base_port, 3)?;
    let processes = cluster(&members, &ProcessConfig::default())?;
    let mut events = processes[1].subscribe();

    start_all(&processes).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::info!("killing process 3");
    processes[2].stop().await?;

    let elected = wait_for(&mut events, Duration::from_secs(20), |e| {
        matches!(e, ProcessEvent::ElectedSelf { .. })
    })
    .await;
    if elected.is_none() {
        tracing::warn!("no new coordinator within 20s");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    log_coordinators(&processes).await;

    stop_running(&processes).await
}

/// Five processes; 4 and 5 are killed and process 1 runs a ring election.
pub async fn ring(base_port: u16) -> DemoResult {
    let members = identities(base_port, 5)?;
    let config = ProcessConfig::default()
        .with_election(ElectionAlgorithm::Ring)
        .with_failure_detection(false);
    let processes = cluster(&members, &config)?;
    let mut events = processes[0].subscribe();

    start_all(&processes).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    tracing::info!("killing processes 4 and 5");
    processes[3].stop().await?;
    processes[4].stop().await?;

    processes[0].trigger_ring_election().await?;
    let returned = wait_for(&mut events, Duration::from_secs(20), |e| {
        matches!(e, ProcessEvent::RingTokenReturned { .. })
    })
    .await;
    if let Some(ProcessEvent::RingTokenReturned { token, coordinator_id }) = returned {
        tracing::info!("token {:?} elected process {}", token, coordinator_id);
    } else {
        tracing::warn!("ring token did not return within 20s");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    log_coordinators(&processes).await;

    stop_running(&processes).await
}

#[cfg(test)]
mod tests {
    use cutpoint_proto::Address;

    use super::*;

    #[test]
    fn identities_use_consecutive_ports() {
        let members = identities(5000, 3).expect("ports fit");
        assert_eq!(members[0], ProcessIdentity::new(1, "127.0.0.1:5001"));
        assert_eq!(members[2].address, Address::from("127.0.0.1:5003"));
    }

    #[test]
    fn ports_past_the_top_of_the_range_are_rejected() {
        assert_eq!(identities(65530, 5).expect("last port is 65535").len(), 5);
        assert!(matches!(identities(65531, 5), Err(NodeError::Config(_))));
        assert!(matches!(identities(u16::MAX, 1), Err(NodeError::Config(_))));
    }
}
