//! Machine Pool - warm pool of container hosts for a job execution system
//!
//! A Rust library that keeps a pool of ready-to-use machines (VMs created
//! through an external docker-machine-style backend) and hands them out to
//! a job scheduler on demand.
//!
//! # Key Features
//!
//! - **Warm pool** - pre-created idle machines for instant acquisition
//! - **Adaptive sizing** - idle target, TTL, and an absolute limit are
//!   re-evaluated on every call, so config changes apply live
//! - **Per-machine lifecycle** - background create/provision/remove with
//!   bounded retries and operator-visible removal reasons
//! - **Acquire/Use/Release** - the scheduler reserves a machine, upgrades it
//!   to a connected one, and hands it back when the job finishes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use machine_pool::{MachineDriver, MachineProvider, PoolConfig};
//!
//! # fn docker_machine() -> Arc<dyn MachineDriver> { unimplemented!() }
//! // The backend implements the MachineDriver port.
//! let provider = MachineProvider::new(docker_machine());
//!
//! let config = PoolConfig::new("runner-%s")
//!     .machine_driver("virtualbox")
//!     .idle_count(2)
//!     .idle_time(Duration::from_secs(600))
//!     .limit(10);
//!
//! // Reserve a machine; None means the pool is still warming up.
//! if let Some(handle) = provider.acquire(&config)? {
//!     // Guarantee a reachable machine and get its credentials.
//!     let (handle, credentials) = provider.use_machine(&config, Some(handle))?;
//!     println!("job runs on {}", credentials.host);
//!     provider.release(&config, handle);
//! }
//! # Ok::<(), machine_pool::Error>(())
//! ```

pub mod config;
pub mod driver;
pub mod error;
mod lifecycle;
mod policy;
pub mod provider;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{PoolConfig, ProviderConfig, NAME_MARKER};
pub use driver::{MachineCredentials, MachineDriver};
pub use error::{Error, Result};
pub use provider::{MachineHandle, MachineProvider};
pub use store::{MachineInfo, MachineState, PoolStatus};
