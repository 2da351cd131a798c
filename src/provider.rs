//! Machine pool provider façade
//!
//! The surface the job scheduler talks to: `acquire` reserves a warm
//! machine (or reports that none is ready yet while the pool fills),
//! `use_machine` guarantees a reachable machine and hands out its
//! credentials, `release` returns a machine to the pool.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::config::{PoolConfig, ProviderConfig};
use crate::driver::{MachineCredentials, MachineDriver};
use crate::lifecycle::Lifecycle;
use crate::policy::{self, PoolCounts, RemovalReason};
use crate::store::{HostStore, MachineInfo, MachineState, PoolStatus};
use crate::{Error, Result};

/// Opaque reference to a pooled machine. Handles compare equal when they
/// refer to the same machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineHandle {
    name: String,
}

impl MachineHandle {
    fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Supplies ready-to-use machines to the job execution system, keeping a
/// warm pool of idle machines sized by the per-call [`PoolConfig`].
pub struct MachineProvider {
    driver: Arc<dyn MachineDriver>,
    store: Arc<HostStore>,
    lifecycle: Lifecycle,
    config: ProviderConfig,
    // Two concurrent acquires must not both decide to pre-warm the same gap.
    acquire_lock: Mutex<()>,
}

impl MachineProvider {
    pub fn new(driver: Arc<dyn MachineDriver>) -> Self {
        Self::with_config(driver, ProviderConfig::default())
    }

    pub fn with_config(driver: Arc<dyn MachineDriver>, config: ProviderConfig) -> Self {
        let store = Arc::new(HostStore::new());
        let lifecycle = Lifecycle::new(driver.clone(), store.clone(), config.clone());
        Self {
            driver,
            store,
            lifecycle,
            config,
            acquire_lock: Mutex::new(()),
        }
    }

    /// Reserve an idle machine.
    ///
    /// `Ok(None)` means no machine is free right now; with a non-zero
    /// `idle_count` the pool is re-filled in the background and a later call
    /// will succeed. It is a normal pending result, not a failure.
    ///
    /// Every call re-applies the caller's pool policy, so lowering
    /// `idle_count` or `limit` takes effect here.
    pub fn acquire(&self, config: &PoolConfig) -> Result<Option<MachineHandle>> {
        config.validate()?;
        let _guard = self.acquire_lock.lock();

        let machines = self.driver.list(&config.node_filter())?;
        let mut counts = self.update_machines(&machines, config);
        self.create_machines(config, &mut counts);

        tracing::debug!(
            creating = counts.creating,
            idle = counts.idle,
            acquired = counts.acquired,
            used = counts.used,
            removing = counts.removing,
            idle_count = config.idle_count,
            limit = config.limit,
            "Machine pool evaluated"
        );

        Ok(self.find_free_machine(&machines))
    }

    /// Guarantee a connectable machine and return its credentials.
    ///
    /// A handle the caller already holds is tried first; a machine that
    /// refuses credentials is released back to the pool. After the retry
    /// budget a machine is created on demand for this caller alone, and
    /// create, provision and connect failures on it surface here.
    pub fn use_machine(
        &self,
        config: &PoolConfig,
        handle: Option<MachineHandle>,
    ) -> Result<(MachineHandle, MachineCredentials)> {
        config.validate()?;

        if let Some(handle) = handle {
            let held = self.store.info(handle.name()).is_some_and(|info| {
                matches!(info.state, MachineState::Acquired | MachineState::Used)
            });
            if held {
                match self.use_credentials(handle.name()) {
                    Ok(credentials) => {
                        self.store.mark_used(handle.name());
                        return Ok((handle, credentials));
                    }
                    Err(err) => {
                        tracing::warn!(
                            machine = %handle.name(),
                            error = %err,
                            "Released unusable machine"
                        );
                    }
                }
            }
        }

        let mut attempt = 0;
        loop {
            let machines = self.driver.list(&config.node_filter())?;
            if let Some(handle) = self.find_free_machine(&machines) {
                match self.use_credentials(handle.name()) {
                    Ok(credentials) => {
                        self.store.mark_used(handle.name());
                        tracing::info!(machine = %handle.name(), "Machine in use");
                        return Ok((handle, credentials));
                    }
                    Err(err) => {
                        tracing::warn!(
                            machine = %handle.name(),
                            error = %err,
                            "Released unusable machine"
                        );
                    }
                }
            } else if self.store.status().creating == 0 {
                // Nothing idle and nothing warming up: waiting cannot help.
                break;
            }

            attempt += 1;
            if attempt >= self.config.use_machine_retries {
                break;
            }
            thread::sleep(self.config.use_machine_retry_interval);
        }

        self.create_and_use(config)
    }

    /// Return a machine to the idle pool. The caller's policy is re-applied
    /// to the released machine, which may retire it on the spot.
    pub fn release(&self, config: &PoolConfig, handle: MachineHandle) {
        let _guard = self.acquire_lock.lock();

        if !self.store.release(handle.name()) {
            tracing::warn!(machine = %handle.name(), "Released machine was not held");
            return;
        }
        tracing::info!(machine = %handle.name(), "Machine released");

        let status = self.store.status();
        if config.limit > 0 && status.total > config.limit {
            self.lifecycle
                .remove(handle.name(), RemovalReason::TooManyMachines);
        } else if config.idle_time.is_zero() && status.idle > config.idle_count {
            self.lifecycle
                .remove(handle.name(), RemovalReason::TooManyIdle);
        }
    }

    /// Pool counts, observed atomically.
    pub fn status(&self) -> PoolStatus {
        self.store.status()
    }

    /// Snapshot of every known machine record.
    pub fn machines(&self) -> Vec<MachineInfo> {
        self.store.machines()
    }

    /// Snapshot of one machine record.
    pub fn machine_info(&self, name: &str) -> Option<MachineInfo> {
        self.store.info(name)
    }

    /// Sweep the machines the driver reports: adopt unknown names as idle,
    /// retire what the caller's policy rejects, and tally the rest.
    fn update_machines(&self, machines: &[String], config: &PoolConfig) -> PoolCounts {
        let mut counts = PoolCounts::default();
        // Machines still warming may not be listed by the driver yet; the
        // store-wide figure keeps the limit check honest during the sweep.
        counts.creating = self.store.status().creating;
        for name in machines {
            self.store.get_or_create(name, MachineState::Idle);
            let Some(info) = self.store.info(name) else {
                continue;
            };
            if let Some(reason) = policy::evaluate_machine(config, &counts, &info) {
                self.lifecycle.remove(name, reason);
            }
            if let Some(info) = self.store.info(name) {
                // In-flight creates are already tallied store-wide.
                if info.state != MachineState::Creating {
                    counts.add(info.state);
                }
            }
        }
        counts
    }

    /// Pre-warm: start background creates until the idle target is met or
    /// the limit stops us.
    fn create_machines(&self, config: &PoolConfig, counts: &mut PoolCounts) {
        while policy::should_create(config, counts) {
            let (_, _completion) = self.lifecycle.create(config, MachineState::Idle);
            counts.creating += 1;
        }
    }

    /// Pick an idle machine among the listed names, preferring the one
    /// handed back most recently. Unreachable machines are never selected.
    fn find_free_machine(&self, machines: &[String]) -> Option<MachineHandle> {
        let mut candidates: Vec<&String> = machines
            .iter()
            .filter(|name| self.driver.can_connect(name))
            .collect();
        candidates.sort_by_cached_key(|name| {
            std::cmp::Reverse(self.store.info(name).map(|info| info.last_used))
        });

        for name in candidates {
            if self.store.get_or_create(name, MachineState::Acquired)
                == Some(MachineState::Acquired)
            {
                tracing::info!(machine = %name, "Machine acquired");
                return Some(MachineHandle::new(name.as_str()));
            }
        }
        None
    }

    /// Fetch credentials for a held machine, releasing it on failure.
    fn use_credentials(&self, name: &str) -> Result<MachineCredentials> {
        match self.driver.credentials(name) {
            Ok(credentials) => Ok(credentials),
            Err(err) => {
                self.store.release(name);
                Err(err)
            }
        }
    }

    /// On-demand path: create a machine directly in the acquired state and
    /// connect to it. A machine that cannot be connected to is scrapped.
    fn create_and_use(&self, config: &PoolConfig) -> Result<(MachineHandle, MachineCredentials)> {
        // The capacity check and the create must be one atomic step, or two
        // on-demand callers could both pass the check and overshoot the
        // limit. The record registers before `create` returns, so the lock
        // is not held while the machine is built.
        let (name, completion) = {
            let _guard = self.acquire_lock.lock();
            if config.limit > 0 && self.store.status().total >= config.limit {
                return Err(Error::Create("machine pool limit reached".into()));
            }
            self.lifecycle.create(config, MachineState::Acquired)
        };
        match completion.recv() {
            Ok(result) => result?,
            Err(_) => return Err(Error::Create("machine creation aborted".into())),
        }

        match self.use_credentials(&name) {
            Ok(credentials) => {
                self.store.mark_used(&name);
                tracing::info!(machine = %name, "Machine in use");
                Ok((MachineHandle::new(name), credentials))
            }
            Err(err) => {
                self.lifecycle.remove(&name, RemovalReason::NoConnect);
                Err(err)
            }
        }
    }
}
