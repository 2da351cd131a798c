//! Pool configuration carried on every call, plus provider tunables

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Marker in the machine name template replaced with a unique suffix.
pub const NAME_MARKER: &str = "%s";

/// Per-call pool configuration.
///
/// The caller passes this on every `acquire`/`use_machine`/`release`, so a
/// changed `idle_count` or `limit` takes effect on the next call without any
/// provider restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Machine name template containing [`NAME_MARKER`].
    pub machine_name: String,
    /// Driver backend name passed through to `MachineDriver::create`.
    pub machine_driver: String,
    /// Extra driver options passed through to `MachineDriver::create`.
    pub machine_options: Vec<String>,
    /// Target number of warm idle machines.
    pub idle_count: usize,
    /// How long a machine may sit idle before it is eligible for removal.
    pub idle_time: Duration,
    /// Absolute cap on machines that are not being removed (0 = unlimited).
    pub limit: usize,
    /// Retire a machine after this many acquisitions (0 = unlimited).
    pub max_builds: usize,
}

impl PoolConfig {
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            machine_driver: String::new(),
            machine_options: Vec::new(),
            idle_count: 0,
            idle_time: Duration::from_secs(0),
            limit: 0,
            max_builds: 0,
        }
    }

    pub fn machine_driver(mut self, driver: impl Into<String>) -> Self {
        self.machine_driver = driver.into();
        self
    }

    pub fn machine_option(mut self, option: impl Into<String>) -> Self {
        self.machine_options.push(option.into());
        self
    }

    pub fn idle_count(mut self, count: usize) -> Self {
        self.idle_count = count;
        self
    }

    pub fn idle_time(mut self, time: Duration) -> Self {
        self.idle_time = time;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn max_builds(mut self, builds: usize) -> Self {
        self.max_builds = builds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.machine_name.is_empty() {
            return Err(Error::Config("machine name template cannot be empty".into()));
        }
        if !self.machine_name.contains(NAME_MARKER) {
            return Err(Error::Config(format!(
                "machine name template must contain '{}'",
                NAME_MARKER
            )));
        }
        Ok(())
    }

    /// Name filter handed to `MachineDriver::list`: the template with the
    /// unique-suffix marker elided.
    pub(crate) fn node_filter(&self) -> String {
        self.machine_name.replacen(NAME_MARKER, "", 1)
    }

    /// Render a fresh machine name from the template.
    pub(crate) fn render_name(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.machine_name.replacen(NAME_MARKER, &suffix[..8], 1)
    }

    /// True when `elapsed` spent in idle exceeds the configured TTL. A zero
    /// `idle_time` means machines expire as soon as they turn idle.
    pub(crate) fn idle_expired(&self, elapsed: Duration) -> bool {
        self.idle_time.is_zero() || elapsed > self.idle_time
    }
}

/// Provider-wide retry tunables.
///
/// Injectable so tests can zero the intervals instead of mutating globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Pause between machine creation attempts.
    pub provision_retry_interval: Duration,
    /// Pause between driver removal attempts.
    pub removal_retry_interval: Duration,
    /// Bound on driver removal attempts before the record is abandoned in
    /// the removing state.
    pub removal_retries: usize,
    /// Pause between acquire-and-connect attempts inside `use_machine`.
    pub use_machine_retry_interval: Duration,
    /// Bound on acquire-and-connect attempts inside `use_machine`.
    pub use_machine_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provision_retry_interval: Duration::from_secs(1),
            removal_retry_interval: Duration::from_secs(1),
            removal_retries: 3,
            use_machine_retry_interval: Duration::from_secs(1),
            use_machine_retries: 3,
        }
    }
}

impl ProviderConfig {
    /// All intervals zeroed; retry counts keep their defaults.
    pub fn immediate() -> Self {
        Self {
            provision_retry_interval: Duration::ZERO,
            removal_retry_interval: Duration::ZERO,
            use_machine_retry_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}
