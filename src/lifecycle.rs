//! Background machine lifecycle engine
//!
//! Owns every driver mutation: asynchronous create/provision with a bounded
//! retry, and removal with bounded retries. Records are mutated under the
//! store lock before and after each driver call, never across one.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::{PoolConfig, ProviderConfig};
use crate::driver::MachineDriver;
use crate::policy::RemovalReason;
use crate::store::{HostStore, MachineState};
use crate::Result;

/// Total create attempts per machine; absorbs backends that fail once and
/// succeed on the next try.
const CREATE_ATTEMPTS: usize = 2;

#[derive(Clone)]
pub(crate) struct Lifecycle {
    driver: Arc<dyn MachineDriver>,
    store: Arc<HostStore>,
    config: ProviderConfig,
}

impl Lifecycle {
    pub(crate) fn new(
        driver: Arc<dyn MachineDriver>,
        store: Arc<HostStore>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            driver,
            store,
            config,
        }
    }

    /// Start creating one machine in the background.
    ///
    /// The record is registered in `Creating` before this returns, so the
    /// new machine immediately counts toward pool totals. The outcome is
    /// delivered exactly once on the returned single-shot channel; pre-warm
    /// callers drop the receiver and let the next acquire retry instead.
    pub(crate) fn create(
        &self,
        pool: &PoolConfig,
        target: MachineState,
    ) -> (String, Receiver<Result<()>>) {
        let name = pool.render_name();
        self.store.get_or_create(&name, MachineState::Creating);

        let (tx, rx) = mpsc::channel();
        let engine = self.clone();
        let machine = name.clone();
        let driver_name = pool.machine_driver.clone();
        let opts = pool.machine_options.clone();
        thread::spawn(move || {
            let result = engine.run_create(&machine, &driver_name, &opts, target);
            let _ = tx.send(result);
        });

        (name, rx)
    }

    fn run_create(
        &self,
        name: &str,
        driver_name: &str,
        opts: &[String],
        target: MachineState,
    ) -> Result<()> {
        let started = Instant::now();

        let mut attempt = 1;
        while let Err(err) = self.driver.create(driver_name, name, opts) {
            if attempt >= CREATE_ATTEMPTS {
                tracing::error!(machine = %name, error = %err, "Machine creation failed");
                self.remove(name, RemovalReason::FailedToCreate);
                return Err(err);
            }
            tracing::warn!(
                machine = %name,
                error = %err,
                attempt,
                "Machine creation failed, retrying"
            );
            attempt += 1;
            thread::sleep(self.config.provision_retry_interval);
        }

        if let Err(err) = self.driver.provision(name) {
            tracing::error!(machine = %name, error = %err, "Machine provisioning failed");
            self.remove(name, RemovalReason::FailedToProvision);
            return Err(err);
        }

        if self.store.complete_create(name, target) {
            tracing::info!(
                machine = %name,
                state = %target,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Machine created"
            );
        }
        Ok(())
    }

    /// Mark a machine for removal and tear it down in the background.
    /// Idempotent for machines already on their way out.
    pub(crate) fn remove(&self, name: &str, reason: RemovalReason) {
        if !self.store.mark_removing(name, &reason.to_string()) {
            return;
        }
        tracing::warn!(machine = %name, reason = %reason, "Removing machine");

        let engine = self.clone();
        let machine = name.to_string();
        thread::spawn(move || engine.run_remove(&machine));
    }

    fn run_remove(&self, name: &str) {
        for attempt in 1..=self.config.removal_retries {
            if !self.driver.exist(name) {
                self.store.delete(name);
                tracing::info!(machine = %name, "Machine already gone, dropping record");
                return;
            }

            match self.driver.remove(name) {
                Ok(()) => {
                    self.store.delete(name);
                    tracing::info!(machine = %name, "Machine removed");
                    return;
                }
                Err(err) => {
                    let retries = self.store.bump_retry(name);
                    tracing::warn!(machine = %name, error = %err, retries, "Machine removal failed");
                    if attempt < self.config.removal_retries {
                        thread::sleep(self.config.removal_retry_interval);
                    }
                }
            }
        }
        tracing::error!(machine = %name, "Giving up on machine removal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wait_until, StubDriver};
    use crate::Error;

    fn engine(machines: &[&str]) -> (Lifecycle, Arc<StubDriver>, Arc<HostStore>) {
        let driver = Arc::new(StubDriver::new(machines));
        let store = Arc::new(HostStore::new());
        let lifecycle = Lifecycle::new(
            driver.clone(),
            store.clone(),
            ProviderConfig::immediate(),
        );
        (lifecycle, driver, store)
    }

    #[test]
    fn test_create_reaches_requested_state() {
        let (lifecycle, driver, store) = engine(&[]);
        let (name, rx) = lifecycle.create(&PoolConfig::new("pool-%s"), MachineState::Used);

        assert!(rx.recv().unwrap().is_ok());
        let info = store.info(&name).unwrap();
        assert_eq!(info.state, MachineState::Used);
        assert_eq!(info.used_count, 1);
        assert!(driver.machines().contains(&name));
    }

    #[test]
    fn test_prewarm_create_stays_idle() {
        let (lifecycle, _, store) = engine(&[]);
        let (name, rx) = lifecycle.create(&PoolConfig::new("pool-%s"), MachineState::Idle);

        assert!(rx.recv().unwrap().is_ok());
        let info = store.info(&name).unwrap();
        assert_eq!(info.state, MachineState::Idle);
        assert_eq!(info.used_count, 0);
    }

    #[test]
    fn test_create_failure_removes_record() {
        let (lifecycle, driver, store) = engine(&[]);
        let (name, rx) = lifecycle.create(&PoolConfig::new("create-fail-%s"), MachineState::Used);

        assert!(matches!(rx.recv().unwrap(), Err(Error::Create(_))));
        // The machine never existed, so the record is dropped without a
        // driver removal.
        assert!(wait_until(|| store.info(&name).is_none()));
        assert_eq!(driver.remove_calls(), 0);
    }

    #[test]
    fn test_second_fail_create_is_retried() {
        let (lifecycle, driver, store) = engine(&[]);
        let (name, rx) = lifecycle.create(&PoolConfig::new("second-fail-%s"), MachineState::Idle);

        assert!(rx.recv().unwrap().is_ok());
        assert_eq!(store.info(&name).unwrap().state, MachineState::Idle);
        assert!(driver.machines().contains(&name));
    }

    #[test]
    fn test_provision_failure_reason_is_visible() {
        let (lifecycle, _, store) = engine(&[]);
        // Removal keeps failing too, so the record stays observable.
        let (name, rx) = lifecycle.create(
            &PoolConfig::new("provision-fail-remove-fail-%s"),
            MachineState::Used,
        );

        assert!(matches!(rx.recv().unwrap(), Err(Error::Provision(_))));
        let info = store.info(&name).unwrap();
        assert_eq!(info.state, MachineState::Removing);
        assert_eq!(info.reason.as_deref(), Some("Failed to provision"));
    }

    #[test]
    fn test_remove_deletes_after_driver_confirms() {
        let (lifecycle, driver, store) = engine(&["machine1"]);
        store.get_or_create("machine1", MachineState::Idle);

        lifecycle.remove("machine1", RemovalReason::TooManyIdle);
        assert!(wait_until(|| store.info("machine1").is_none()));
        assert!(driver.machines().is_empty());
    }

    #[test]
    fn test_remove_skips_driver_for_missing_machine() {
        let (lifecycle, driver, store) = engine(&[]);
        store.get_or_create("no-can-connect-remove-fail", MachineState::Idle);

        lifecycle.remove("no-can-connect-remove-fail", RemovalReason::TooManyIdle);
        assert!(wait_until(|| store.info("no-can-connect-remove-fail").is_none()));
        assert_eq!(driver.remove_calls(), 0);
    }

    #[test]
    fn test_removal_retries_are_bounded() {
        let (lifecycle, driver, store) = engine(&["remove-fail-1"]);
        store.get_or_create("remove-fail-1", MachineState::Idle);

        lifecycle.remove("remove-fail-1", RemovalReason::TooManyMachines);
        assert!(wait_until(|| {
            store
                .info("remove-fail-1")
                .is_some_and(|info| info.retry_count == 3)
        }));

        let info = store.info("remove-fail-1").unwrap();
        assert_eq!(info.state, MachineState::Removing);
        assert_eq!(info.reason.as_deref(), Some("Too many machines"));
        assert!(driver.machines().contains(&"remove-fail-1".to_string()));
    }
}
