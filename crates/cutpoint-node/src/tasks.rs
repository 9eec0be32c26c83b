//! Long-running background tasks of a process.
//!
//! Each loop selects on the lifecycle channel and exits once the process is
//! stopped. Work already in progress (one inbound frame, one outgoing
//! message) finishes first, bounded by the connect timeout.

use std::sync::Arc;

use cutpoint_core::{
    env::Environment,
    transport::{Listener, Transport, read_message},
};
use tokio::sync::watch;

use crate::{
    event::ProcessEvent,
    outbox::Link,
    process::{Lifecycle, Shared},
};

/// Resolves once the lifecycle reaches `Stopped` (or its sender is gone).
pub(crate) async fn stopped(mut lifecycle: watch::Receiver<Lifecycle>) {
    let _ = lifecycle.wait_for(|state| *state == Lifecycle::Stopped).await;
}

/// Accept inbound connections and apply each frame before accepting the
/// next, so messages from one sender are applied in the order they were sent.
pub(crate) async fn run_listener<E, T>(shared: Arc<Shared<E, T>>, listener: T::Listener)
where
    E: Environment,
    T: Transport,
{
    let stop = stopped(shared.lifecycle.subscribe());
    tokio::pin!(stop);

    loop {
        let mut stream = tokio::select! {
            () = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(process = shared.identity.id, "accept failed: {}", e);
                    continue;
                },
            },
        };

        let timeout = shared.config.connect_timeout;
        match tokio::time::timeout(timeout, read_message(&mut stream)).await {
            Ok(Ok(Some(message))) => shared.handle(message).await,
            Ok(Ok(None)) => tracing::trace!(process = shared.identity.id, "liveness probe"),
            Ok(Err(e)) => {
                shared.emit(ProcessEvent::ProtocolViolation { from: None, reason: e.to_string() });
            },
            Err(_) => shared.emit(ProcessEvent::ProtocolViolation {
                from: None,
                reason: format!("no frame within {timeout:?}"),
            }),
        }
    }

    tracing::debug!(process = shared.identity.id, "listener closed");
}

/// Drain one peer's outbox, one connection per message.
pub(crate) async fn run_link<E, T>(shared: Arc<Shared<E, T>>, mut link: Link)
where
    E: Environment,
    T: Transport,
{
    let stop = stopped(shared.lifecycle.subscribe());
    tokio::pin!(stop);

    loop {
        let message = tokio::select! {
            () = &mut stop => break,
            next = link.queue.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        shared.deliver(&link.to, &message).await;
    }
}

/// Generate a local event every event interval.
pub(crate) async fn run_events<E, T>(shared: Arc<Shared<E, T>>)
where
    E: Environment,
    T: Transport,
{
    while shared.sleep_unless_stopped(shared.config.event_interval).await {
        shared.tick().await;
    }
}

/// Probe the believed coordinator every detection interval.
pub(crate) async fn run_detector<E, T>(shared: Arc<Shared<E, T>>)
where
    E: Environment,
    T: Transport,
{
    while shared.sleep_unless_stopped(shared.config.detection_interval).await {
        shared.check_coordinator().await;
    }
}
