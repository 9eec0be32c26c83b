//! Cutpoint process runtime.
//!
//! Runs the core state machines on tokio: one [`Process`] per cluster member,
//! each with a listener, a periodic local-event task, an optional coordinator
//! failure detector, and one outbox task per peer.
//!
//! ## Architecture
//!
//! ```text
//! cutpoint-node
//!   ├─ Process         (lifecycle, handlers, action execution)
//!   ├─ Outbox          (per-peer FIFO queues for APP and MARKER)
//!   ├─ ProcessEvent    (observable event stream, also logged)
//!   ├─ TcpTransport    (production Transport impl)
//!   └─ SystemEnv       (production Environment impl)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod outbox;
mod process;
mod system_env;
mod tasks;
mod tcp;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_DETECTION_INTERVAL, DEFAULT_ELECTION_TIMEOUT,
    DEFAULT_EVENT_CAPACITY, DEFAULT_EVENT_INTERVAL, DEFAULT_OUTBOX_CAPACITY, DEFAULT_TOKEN_TIMEOUT,
    ProcessConfig,
};
pub use error::NodeError;
pub use event::ProcessEvent;
pub use process::{Lifecycle, Process};
pub use system_env::SystemEnv;
pub use tcp::{TcpAcceptor, TcpTransport};

/// A process on real sockets and the OS clock.
pub type TcpProcess = Process<SystemEnv, TcpTransport>;

impl TcpProcess {
    /// Create a process that talks TCP.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Config` if `config` fails validation.
    pub fn over_tcp(
        identity: cutpoint_proto::ProcessIdentity,
        peers: Vec<cutpoint_proto::ProcessIdentity>,
        config: ProcessConfig,
    ) -> Result<Self, NodeError> {
        Self::new(identity, peers, config, SystemEnv::new(), TcpTransport)
    }
}
