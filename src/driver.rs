//! Port over the external machine backend
//!
//! The provider drives real machines exclusively through this trait; the
//! backing implementation (docker-machine or an equivalent) lives outside
//! the crate and is injected at construction time.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Connection material for a ready machine, handed to the container runtime
/// that will run jobs on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineCredentials {
    /// Daemon endpoint, e.g. `tcp://10.0.0.5:2376`.
    pub host: String,
    /// Directory holding the TLS client certificates.
    pub cert_path: String,
    /// Whether the endpoint verifies TLS client certificates.
    pub tls_verify: bool,
}

/// Capability set the pool consumes from the machine backend.
///
/// Concurrent calls on different machine names must be safe; the provider
/// serializes calls touching the same name.
pub trait MachineDriver: Send + Sync {
    /// Create a new machine. `driver` selects the backend flavour and
    /// `opts` are passed through verbatim.
    fn create(&self, driver: &str, name: &str, opts: &[String]) -> Result<()>;

    /// Prepare a created machine for first use.
    fn provision(&self, name: &str) -> Result<()>;

    /// Tear the machine down.
    fn remove(&self, name: &str) -> Result<()>;

    /// Cheap existence check; must not require a round-trip to the machine.
    fn exist(&self, name: &str) -> bool;

    /// Names of machines known to the backend, filtered by name prefix.
    fn list(&self, node_filter: &str) -> Result<Vec<String>>;

    /// Network reachability probe.
    fn can_connect(&self, name: &str) -> bool;

    /// Obtain connection credentials for a machine.
    fn credentials(&self, name: &str) -> Result<MachineCredentials>;
}
