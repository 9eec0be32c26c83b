//! Building blocks for simulated cluster scenarios.
//!
//! Each member runs on its own turmoil host named `node{id}` and listens on
//! [`PORT`]. Events from every member are collected in one [`EventLog`] that
//! the test inspects after the simulation ends.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use cutpoint_node::{NodeError, Process, ProcessConfig, ProcessEvent};
use cutpoint_proto::{ProcessId, ProcessIdentity};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{SimEnv, SimTransport};

/// Port every simulated member listens on.
pub const PORT: u16 = 5000;

/// A process on the simulated network.
pub type SimProcess = Process<SimEnv, SimTransport>;

/// Turmoil host name for member `id`.
pub fn host_name(id: ProcessId) -> String {
    format!("node{id}")
}

/// Identities `1..=size`, each on its own host.
pub fn identities(size: u64) -> Vec<ProcessIdentity> {
    (1..=size).map(|id| ProcessIdentity::new(id, format!("{}:{PORT}", host_name(id)))).collect()
}

/// Create the process for `identity`, peered with the rest of `members`.
pub fn sim_process(
    identity: &ProcessIdentity,
    members: &[ProcessIdentity],
    config: ProcessConfig,
) -> Result<SimProcess, NodeError> {
    let peers = members.iter().filter(|p| p.id != identity.id).cloned().collect();
    Process::new(identity.clone(), peers, config, SimEnv::new(), SimTransport)
}

/// Host body for one member: create and start it, record its events, run
/// `script`, then keep the host up so the process's tasks keep running.
pub async fn run_member<F, Fut>(
    identity: ProcessIdentity,
    members: Vec<ProcessIdentity>,
    config: ProcessConfig,
    log: EventLog,
    script: F,
) -> turmoil::Result
where
    F: FnOnce(Arc<SimProcess>) -> Fut,
    Fut: Future<Output = Result<(), NodeError>>,
{
    let process = Arc::new(sim_process(&identity, &members, config)?);
    log.record(identity.id, process.subscribe());
    process.start().await?;

    script(Arc::clone(&process)).await?;

    std::future::pending::<()>().await;
    Ok(())
}

/// Events from every member, in the order they were observed.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<(ProcessId, ProcessEvent)>>>,
}

impl EventLog {
    /// Drain `events` from process `id` into the log on a background task.
    pub fn record(&self, id: ProcessId, mut events: broadcast::Receiver<ProcessEvent>) {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log.push(id, event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(process = id, "event log missed {} events", missed);
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn push(&self, id: ProcessId, event: ProcessEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push((id, event));
    }

    /// Copy of every event recorded so far.
    pub fn all(&self) -> Vec<(ProcessId, ProcessEvent)> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events of process `id`.
    pub fn of(&self, id: ProcessId) -> Vec<ProcessEvent> {
        self.all().into_iter().filter(|(from, _)| *from == id).map(|(_, e)| e).collect()
    }

    /// Number of events, across all processes, matching `want`.
    pub fn count(&self, want: impl Fn(&ProcessEvent) -> bool) -> usize {
        self.all().iter().filter(|(_, e)| want(e)).count()
    }

    /// Last coordinator process `id` acknowledged, if any.
    pub fn coordinator(&self, id: ProcessId) -> Option<ProcessId> {
        self.of(id).iter().rev().find_map(|e| match e {
            ProcessEvent::CoordinatorAcknowledged { coordinator_id, .. } => Some(*coordinator_id),
            _ => None,
        })
    }
}
