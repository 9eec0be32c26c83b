//! Per-peer outgoing queues.
//!
//! Chandy-Lamport needs FIFO channels, but the transport opens a fresh
//! connection per message and concurrent connections race. Every `APP` and
//! `MARKER` for a peer therefore goes through that peer's queue, drained by a
//! single task that sends one message at a time.

use std::collections::BTreeMap;

use cutpoint_proto::{Address, Message, ProcessIdentity};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Sending half: one bounded queue per peer.
#[derive(Debug)]
pub(crate) struct Outbox {
    queues: BTreeMap<Address, mpsc::Sender<Message>>,
}

/// Receiving half of one peer's queue.
#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) to: Address,
    pub(crate) queue: mpsc::Receiver<Message>,
}

impl Outbox {
    /// Create a queue for each peer. The links are handed to sender tasks on
    /// start.
    pub(crate) fn new(peers: &[ProcessIdentity], capacity: usize) -> (Self, Vec<Link>) {
        let mut queues = BTreeMap::new();
        let mut links = Vec::with_capacity(peers.len());
        for peer in peers {
            let (tx, rx) = mpsc::channel(capacity);
            queues.insert(peer.address.clone(), tx);
            links.push(Link { to: peer.address.clone(), queue: rx });
        }
        (Self { queues }, links)
    }

    /// Queue `message` for `to` without waiting.
    ///
    /// Fails if the queue is full or its sender task has exited.
    pub(crate) fn enqueue(&self, to: &Address, message: Message) -> Result<(), String> {
        let Some(queue) = self.queues.get(to) else {
            return Err(format!("no outbox for {to}"));
        };
        queue.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => "outbox full".to_string(),
            TrySendError::Closed(_) => "outbox closed".to_string(),
        })
    }

    /// Peers with a queue.
    pub(crate) fn peers(&self) -> impl Iterator<Item = &Address> {
        self.queues.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(n: u64) -> Message {
        Message::App { from: Address::from("a:1"), timestamp: n, payload: format!("m{n}") }
    }

    #[tokio::test]
    async fn queue_preserves_order() {
        let peers = [ProcessIdentity::new(2, "b:2")];
        let (outbox, mut links) = Outbox::new(&peers, 8);
        let mut link = links.remove(0);

        for n in 1..=3 {
            outbox.enqueue(&Address::from("b:2"), app(n)).expect("enqueue");
        }

        for n in 1..=3 {
            assert_eq!(link.queue.recv().await, Some(app(n)));
        }
        assert_eq!(link.to, Address::from("b:2"));
    }

    #[test]
    fn full_queue_rejects() {
        let peers = [ProcessIdentity::new(2, "b:2")];
        let (outbox, _links) = Outbox::new(&peers, 1);
        let to = Address::from("b:2");

        outbox.enqueue(&to, app(1)).expect("first fits");
        assert_eq!(outbox.enqueue(&to, app(2)), Err("outbox full".to_string()));
    }

    #[test]
    fn dropped_link_closes_queue() {
        let peers = [ProcessIdentity::new(2, "b:2")];
        let (outbox, links) = Outbox::new(&peers, 4);
        drop(links);

        assert_eq!(outbox.enqueue(&Address::from("b:2"), app(1)), Err("outbox closed".to_string()));
    }

    #[test]
    fn unknown_peer_has_no_queue() {
        let (outbox, _links) = Outbox::new(&[], 4);
        assert!(outbox.enqueue(&Address::from("z:9"), app(1)).is_err());
        assert_eq!(outbox.peers().count(), 0);
    }
}
