//! Process runtime.
//!
//! A [`Process`] owns one member's clock, application state, election state
//! and snapshot state, and runs the background tasks that move them:
//!
//! ```text
//!   listener ── inbound frame ──▶ handle() ──▶ clock / election / snapshot
//!   events   ── every tick ─────▶ counter++, APP ──▶ outbox ──▶ link task
//!   detector ── every interval ─▶ probe coordinator ──▶ election on failure
//! ```
//!
//! The core state machines return actions. This module executes them: queue
//! or spawn sends, arm timeouts, and publish events.
//!
//! # Lock order
//!
//! `snapshot → app → clock`. The election lock is never held together with
//! another lock. Capturing local state and queueing markers both happen under
//! the app lock, so no `APP` send can fall between the cut and the markers.

use std::{fmt, sync::Arc, time::Duration};

use cutpoint_core::{
    clock::LamportClock,
    election::{Election, ElectionAction, ElectionAlgorithm},
    env::Environment,
    snapshot::{SnapshotAction, SnapshotError, SnapshotState},
    transport::{Transport, probe, send_message},
};
use cutpoint_proto::{
    Address, ApplicationState, LocalSnapshot, Message, ProcessId, ProcessIdentity, Status,
};
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
};

use crate::{
    config::ProcessConfig,
    error::NodeError,
    event::ProcessEvent,
    outbox::{Link, Outbox},
    tasks,
};

/// Lifecycle of a process. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet started
    Created,
    /// Listening and running background tasks
    Running,
    /// Stopped for good; a recovered member is a new `Process`
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// State shared by the process handle and its tasks.
pub(crate) struct Shared<E, T> {
    pub(crate) identity: ProcessIdentity,
    pub(crate) config: ProcessConfig,
    pub(crate) env: E,
    pub(crate) transport: T,
    pub(crate) lifecycle: watch::Sender<Lifecycle>,
    events: broadcast::Sender<ProcessEvent>,
    outbox: Outbox,
    clock: Mutex<LamportClock>,
    app: Mutex<ApplicationState>,
    election: Mutex<Election>,
    snapshot: Mutex<SnapshotState>,
}

/// One member of the cluster.
///
/// Generic over the environment (time) and transport so the same runtime runs
/// on tokio with TCP and inside a turmoil simulation.
pub struct Process<E, T> {
    shared: Arc<Shared<E, T>>,
    links: Mutex<Vec<Link>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E, T> Process<E, T>
where
    E: Environment,
    T: Transport,
{
    /// Create a process. Nothing runs until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Config` if `config` fails validation for this
    /// identity and peer set.
    pub fn new(
        identity: ProcessIdentity,
        peers: Vec<ProcessIdentity>,
        config: ProcessConfig,
        env: E,
        transport: T,
    ) -> Result<Self, NodeError> {
        config.validate(&identity, &peers)?;

        let (outbox, links) = Outbox::new(&peers, config.outbox_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let (lifecycle, _) = watch::channel(Lifecycle::Created);
        let election = Election::new(identity.clone(), peers.iter().cloned());
        let snapshot =
            SnapshotState::new(identity.address.clone(), peers.iter().map(|p| p.address.clone()));

        let shared = Shared {
            identity,
            config,
            env,
            transport,
            lifecycle,
            events,
            outbox,
            clock: Mutex::new(LamportClock::new()),
            app: Mutex::new(ApplicationState::default()),
            election: Mutex::new(election),
            snapshot: Mutex::new(snapshot),
        };

        Ok(Self { shared: Arc::new(shared), links: Mutex::new(links), tasks: Mutex::new(Vec::new()) })
    }

    /// This process's identity.
    pub fn identity(&self) -> &ProcessIdentity {
        &self.shared.identity
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.borrow()
    }

    /// Subscribe to this process's events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.shared.events.subscribe()
    }

    /// Current coordinator belief.
    pub async fn coordinator_id(&self) -> ProcessId {
        self.shared.election.lock().await.coordinator_id()
    }

    /// Current Lamport clock value.
    pub async fn clock(&self) -> u64 {
        self.shared.clock.lock().await.time()
    }

    /// Copy of the application state.
    pub async fn app_state(&self) -> ApplicationState {
        *self.shared.app.lock().await
    }

    /// True while a snapshot round or collection is in progress here.
    pub async fn snapshot_active(&self) -> bool {
        self.shared.snapshot.lock().await.is_active()
    }

    /// Bind the listener and spawn the background tasks.
    ///
    /// # Errors
    ///
    /// - `InvalidLifecycle` unless the process is `Created`
    /// - `Transport` if the listener cannot be bound; the process is then
    ///   `Stopped`
    pub async fn start(&self) -> Result<(), NodeError> {
        self.transition("start", Lifecycle::Created, Lifecycle::Running)?;

        let shared = &self.shared;
        let listener = match shared.transport.bind(&shared.identity.address).await {
            Ok(listener) => listener,
            Err(e) => {
                shared.lifecycle.send_replace(Lifecycle::Stopped);
                return Err(e.into());
            },
        };

        let links = std::mem::take(&mut *self.links.lock().await);
        {
            let mut handles = self.tasks.lock().await;
            handles.push(tokio::spawn(tasks::run_listener(Arc::clone(shared), listener)));
            for link in links {
                handles.push(tokio::spawn(tasks::run_link(Arc::clone(shared), link)));
            }
            handles.push(tokio::spawn(tasks::run_events(Arc::clone(shared))));
            if shared.config.failure_detection {
                handles.push(tokio::spawn(tasks::run_detector(Arc::clone(shared))));
            }
        }

        shared.emit(ProcessEvent::Started { address: shared.identity.address.clone() });

        if shared.config.elect_on_start {
            shared.start_election(shared.config.election).await;
        }
        Ok(())
    }

    /// Stop the process and wait for its background tasks to exit.
    ///
    /// One-way: a stopped process cannot be started again.
    ///
    /// # Errors
    ///
    /// - `InvalidLifecycle` unless the process is `Running`
    pub async fn stop(&self) -> Result<(), NodeError> {
        self.transition("stop", Lifecycle::Running, Lifecycle::Stopped)?;

        self.shared.app.lock().await.status = Status::Off;

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(process = self.shared.identity.id, "task ended abnormally: {}", e);
            }
        }

        self.shared.emit(ProcessEvent::Stopped);
        Ok(())
    }

    /// Start a Chandy-Lamport snapshot from this process.
    ///
    /// Returns `false` without doing anything if a round is already active
    /// here.
    ///
    /// # Errors
    ///
    /// - `InvalidLifecycle` unless the process is `Running`
    /// - `NotSnapshotCoordinator` if another process is configured as the
    ///   snapshot coordinator
    pub async fn initiate_snapshot(&self) -> Result<bool, NodeError> {
        self.ensure_running("initiate a snapshot on")?;

        let shared = &self.shared;
        if let Some(coordinator) = &shared.config.snapshot_coordinator
            && *coordinator != shared.identity.address
        {
            return Err(NodeError::NotSnapshotCoordinator { coordinator: coordinator.clone() });
        }

        let mut snapshot = shared.snapshot.lock().await;
        if snapshot.is_active() {
            tracing::debug!(process = shared.identity.id, "snapshot already active");
            return Ok(false);
        }

        let app = shared.app.lock().await;
        let local = shared.capture(&app).await;
        match snapshot.initiate(local) {
            Ok(actions) => {
                shared.execute_snapshot(actions);
                Ok(true)
            },
            Err(SnapshotError::AlreadyActive) => Ok(false),
            Err(e) => {
                tracing::warn!(process = shared.identity.id, "snapshot not started: {}", e);
                Ok(false)
            },
        }
    }

    /// Start a Bully election. Collapses into one already in flight.
    ///
    /// # Errors
    ///
    /// - `InvalidLifecycle` unless the process is `Running`
    pub async fn trigger_bully_election(&self) -> Result<(), NodeError> {
        self.ensure_running("trigger an election on")?;
        self.shared.start_election(ElectionAlgorithm::Bully).await;
        Ok(())
    }

    /// Start a Ring election. Collapses into one already in flight.
    ///
    /// # Errors
    ///
    /// - `InvalidLifecycle` unless the process is `Running`
    pub async fn trigger_ring_election(&self) -> Result<(), NodeError> {
        self.ensure_running("trigger an election on")?;
        self.shared.start_election(ElectionAlgorithm::Ring).await;
        Ok(())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), NodeError> {
        match self.lifecycle() {
            Lifecycle::Running => Ok(()),
            state => Err(NodeError::InvalidLifecycle { operation, state }),
        }
    }

    fn transition(
        &self,
        operation: &'static str,
        from: Lifecycle,
        to: Lifecycle,
    ) -> Result<(), NodeError> {
        let mut state = from;
        let moved = self.shared.lifecycle.send_if_modified(|current| {
            state = *current;
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        });

        if moved { Ok(()) } else { Err(NodeError::InvalidLifecycle { operation, state }) }
    }
}

impl<E, T> Drop for Process<E, T> {
    fn drop(&mut self) {
        // Tasks hold the shared state; tell them to exit.
        self.shared.lifecycle.send_if_modified(|current| {
            if *current == Lifecycle::Running {
                *current = Lifecycle::Stopped;
                true
            } else {
                false
            }
        });
    }
}

impl<E, T> Shared<E, T>
where
    E: Environment,
    T: Transport,
{
    /// Publish and log an event.
    pub(crate) fn emit(&self, event: ProcessEvent) {
        event.log(self.identity.id);
        // Err only means nobody is subscribed.
        let _ = self.events.send(event);
    }

    /// Sleep for `duration`. Returns false if the process stopped first.
    pub(crate) async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.env.sleep(duration) => true,
            () = tasks::stopped(self.lifecycle.subscribe()) => false,
        }
    }

    /// One local event: advance the clock and counter, then broadcast `APP`.
    pub(crate) async fn tick(&self) {
        let mut app = self.app.lock().await;
        let timestamp = {
            let mut clock = self.clock.lock().await;
            clock.increment();
            app.counter += 1;
            clock.increment()
        };
        self.emit(ProcessEvent::InternalEvent { counter: app.counter, clock: timestamp });

        let message = Message::App {
            from: self.identity.address.clone(),
            timestamp,
            payload: format!("msg from {}", self.identity.id),
        };
        self.broadcast(&message);
    }

    /// Probe the coordinator and start an election if it is unreachable.
    pub(crate) async fn check_coordinator(self: &Arc<Self>) {
        let coordinator = {
            let election = self.election.lock().await;
            if election.is_coordinator() || election.in_progress() {
                return;
            }
            election.coordinator().cloned()
        };
        let Some(coordinator) = coordinator else {
            return;
        };

        let started = self.env.now();
        match probe(&self.transport, &coordinator.address, self.config.connect_timeout).await {
            Ok(()) => tracing::trace!(
                process = self.identity.id,
                elapsed = ?self.env.now().duration_since(started),
                "coordinator {} alive",
                coordinator
            ),
            Err(e) if e.is_unreachable() => {
                self.emit(ProcessEvent::CoordinatorFailureDetected {
                    coordinator_id: coordinator.id,
                });
                self.start_election(self.config.election).await;
            },
            Err(e) => tracing::warn!(process = self.identity.id, "probe failed: {}", e),
        }
    }

    pub(crate) async fn start_election(self: &Arc<Self>, algorithm: ElectionAlgorithm) {
        let actions = {
            let mut election = self.election.lock().await;
            match algorithm {
                ElectionAlgorithm::Bully => election.start_bully(),
                ElectionAlgorithm::Ring => election.start_ring(),
            }
        };
        self.execute_election(actions);
    }

    /// Apply one inbound message.
    pub(crate) async fn handle(self: &Arc<Self>, message: Message) {
        self.emit(ProcessEvent::MessageReceived {
            from: message.sender().clone(),
            tag: message.tag(),
        });

        match message {
            Message::App { from, timestamp, payload } => {
                let mut snapshot = self.snapshot.lock().await;
                let now = {
                    let mut clock = self.clock.lock().await;
                    clock.update(timestamp);
                    clock.increment()
                };
                let recorded = snapshot.record(&from, &payload, timestamp);
                tracing::debug!(
                    process = self.identity.id,
                    %from,
                    timestamp,
                    clock = now,
                    recorded,
                    "app message: {}",
                    payload
                );
            },
            Message::Election { from, from_id } => {
                let actions =
                    self.election.lock().await.on_election(ProcessIdentity::new(from_id, from));
                self.execute_election(actions);
            },
            Message::ElectionOk { from_id, .. } => {
                let actions = self.election.lock().await.on_election_ok(from_id);
                self.execute_election(actions);
            },
            Message::Coordinator { from_id, .. } => {
                let actions = self.election.lock().await.on_coordinator(from_id);
                self.execute_election(actions);
            },
            Message::RingElection { token, .. } => {
                let actions = self.election.lock().await.on_ring_election(token);
                self.execute_election(actions);
            },
            Message::RingCoordinator { coordinator_id, initiator, .. } => {
                let actions =
                    self.election.lock().await.on_ring_coordinator(coordinator_id, initiator);
                self.execute_election(actions);
            },
            Message::Marker { from, initiator } => {
                let mut snapshot = self.snapshot.lock().await;
                let app = self.app.lock().await;
                let local = if snapshot.needs_local_capture() {
                    Some(self.capture(&app).await)
                } else {
                    None
                };
                match snapshot.on_marker(&from, &initiator, local) {
                    Ok(actions) => self.execute_snapshot(actions),
                    Err(e) => self.reject(from, &e),
                }
            },
            Message::SnapshotResult { from, snapshot: contribution } => {
                let result = self.snapshot.lock().await.on_result(&from, contribution);
                match result {
                    Ok(actions) => self.execute_snapshot(actions),
                    Err(e) => self.reject(from, &e),
                }
            },
        }
    }

    /// Send `message` to `to` on a fresh connection. Returns true on success.
    pub(crate) async fn deliver(&self, to: &Address, message: &Message) -> bool {
        let tag = message.tag();
        match send_message(&self.transport, to, message, self.config.connect_timeout).await {
            Ok(()) => {
                self.emit(ProcessEvent::MessageSent { to: to.clone(), tag });
                true
            },
            Err(e) => {
                self.emit(ProcessEvent::SendFailed { to: to.clone(), tag, reason: e.to_string() });
                false
            },
        }
    }

    /// Capture local state. The caller holds the app lock.
    async fn capture(&self, app: &ApplicationState) -> LocalSnapshot {
        let clock = self.clock.lock().await.time();
        LocalSnapshot { process_id: self.identity.id, state: *app, clock }
    }

    /// Queue `message` for every peer, behind anything already queued.
    fn broadcast(&self, message: &Message) {
        for to in self.outbox.peers() {
            if let Err(reason) = self.outbox.enqueue(to, message.clone()) {
                self.emit(ProcessEvent::SendFailed { to: to.clone(), tag: message.tag(), reason });
            }
        }
    }

    fn reject(&self, from: Address, error: &SnapshotError) {
        self.emit(ProcessEvent::ProtocolViolation { from: Some(from), reason: error.to_string() });
    }

    /// Send a control message on its own task.
    fn spawn_send(self: &Arc<Self>, to: Address, message: Message) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.deliver(&to, &message).await;
        });
    }

    fn execute_election(self: &Arc<Self>, actions: Vec<ElectionAction>) {
        for action in actions {
            match action {
                ElectionAction::Send { to, message } => self.spawn_send(to.address, message),
                ElectionAction::Forward { route, message } => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        for hop in &route {
                            if shared.deliver(&hop.address, &message).await {
                                return;
                            }
                        }
                        let actions = shared.election.lock().await.on_route_exhausted(&message);
                        shared.execute_election(actions);
                    });
                },
                ElectionAction::AwaitOk { round } => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        if shared.sleep_unless_stopped(shared.config.election_timeout).await {
                            let actions = shared.election.lock().await.on_ok_timeout(round);
                            shared.execute_election(actions);
                        }
                    });
                },
                ElectionAction::AwaitToken { round } => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        if shared.sleep_unless_stopped(shared.config.token_timeout).await {
                            let actions = shared.election.lock().await.on_token_timeout(round);
                            shared.execute_election(actions);
                        }
                    });
                },
                ElectionAction::Started { algorithm, round } => {
                    self.emit(ProcessEvent::ElectionStarted { algorithm, round });
                },
                ElectionAction::Deferred { to } => self.emit(ProcessEvent::ElectionDeferred { to }),
                ElectionAction::Elected { algorithm } => {
                    self.emit(ProcessEvent::ElectedSelf { algorithm });
                },
                ElectionAction::TokenReturned { token, coordinator_id } => {
                    self.emit(ProcessEvent::RingTokenReturned { token, coordinator_id });
                },
                ElectionAction::Acknowledged { coordinator_id, previous, algorithm } => {
                    self.emit(ProcessEvent::CoordinatorAcknowledged {
                        coordinator_id,
                        previous,
                        algorithm,
                    });
                },
                ElectionAction::Abandoned { algorithm, round } => {
                    self.emit(ProcessEvent::ElectionAbandoned { algorithm, round });
                },
            }
        }
    }

    /// Execute snapshot actions. Called with the snapshot and app locks held
    /// so markers are queued atomically with the capture.
    fn execute_snapshot(self: &Arc<Self>, actions: Vec<SnapshotAction>) {
        for action in actions {
            match action {
                SnapshotAction::Broadcast(message) => self.broadcast(&message),
                SnapshotAction::Send { to, message } => self.spawn_send(to, message),
                SnapshotAction::Recorded(local) => self.emit(ProcessEvent::SnapshotRecorded(local)),
                SnapshotAction::Completed(snapshot) => {
                    self.emit(ProcessEvent::SnapshotCompleted(snapshot));
                },
                SnapshotAction::Assembled(global) => {
                    self.emit(ProcessEvent::GlobalSnapshotAssembled(global));
                },
                SnapshotAction::AwaitCompletion { round } => {
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        if shared.sleep_unless_stopped(shared.config.snapshot_timeout).await {
                            let actions = shared.snapshot.lock().await.on_timeout(round);
                            shared.execute_snapshot(actions);
                        }
                    });
                },
                SnapshotAction::Abandoned { round, initiator } => {
                    self.emit(ProcessEvent::SnapshotAbandoned { round, initiator });
                },
            }
        }
    }
}
