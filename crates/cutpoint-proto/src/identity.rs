//! Process identities and logical addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric process identifier. Elections compare these; the highest wins.
pub type ProcessId = u64;

/// Logical address of a process (`host:port`).
///
/// Addresses are opaque to the protocol. Transports decide how to resolve
/// them: the TCP transport hands them to the OS resolver, the simulation
/// transport resolves simulated host names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from anything string-like.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Port component, if the address ends in `:<port>`.
    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a process: its id and where it listens.
///
/// Immutable once the process is created. Peer sets are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Process id
    pub id: ProcessId,
    /// Listening address
    pub address: Address,
}

impl ProcessIdentity {
    /// Create a new identity.
    pub fn new(id: ProcessId, address: impl Into<Address>) -> Self {
        Self { id, address: address.into() }
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_parsed_from_host_port() {
        assert_eq!(Address::from("node-1:5000").port(), Some(5000));
        assert_eq!(Address::from("127.0.0.1:0").port(), Some(0));
    }

    #[test]
    fn port_is_none_without_numeric_suffix() {
        assert_eq!(Address::from("node-1").port(), None);
        assert_eq!(Address::from("node-1:http").port(), None);
    }

    #[test]
    fn identity_display() {
        let identity = ProcessIdentity::new(3, "node-3:5000");
        assert_eq!(identity.to_string(), "3@node-3:5000");
    }
}
