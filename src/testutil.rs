//! Test doubles shared by the crate's unit tests

use std::time::Duration;

use parking_lot::Mutex;

use crate::driver::{MachineCredentials, MachineDriver};
use crate::{Error, Result};

/// Scriptable in-memory machine backend. Failure modes are keyed off the
/// machine name, so test templates select behaviour:
/// - `create-fail`: creation always fails
/// - `second-fail`: the first creation fails, later ones succeed
/// - `provision-fail`: creation succeeds, provisioning fails
/// - `no-connect`: credentials are never obtainable
/// - `no-can-connect`: unreachable and reported as nonexistent
/// - `remove-fail`: driver removal always fails
pub(crate) struct StubDriver {
    machines: Mutex<Vec<String>>,
    second_failed: Mutex<bool>,
    remove_calls: Mutex<usize>,
    list_error: Mutex<bool>,
}

impl StubDriver {
    pub(crate) fn new(machines: &[&str]) -> Self {
        Self {
            machines: Mutex::new(machines.iter().map(|m| m.to_string()).collect()),
            second_failed: Mutex::new(false),
            remove_calls: Mutex::new(0),
            list_error: Mutex::new(false),
        }
    }

    pub(crate) fn machines(&self) -> Vec<String> {
        self.machines.lock().clone()
    }

    pub(crate) fn remove_calls(&self) -> usize {
        *self.remove_calls.lock()
    }

    pub(crate) fn fail_lists(&self, fail: bool) {
        *self.list_error.lock() = fail;
    }
}

impl MachineDriver for StubDriver {
    fn create(&self, _driver: &str, name: &str, _opts: &[String]) -> Result<()> {
        if name.contains("second-fail") {
            let mut failed = self.second_failed.lock();
            if !*failed {
                *failed = true;
                return Err(Error::Create("transient backend failure".into()));
            }
        } else if name.contains("create-fail") {
            return Err(Error::Create("backend rejected machine".into()));
        }
        self.machines.lock().push(name.to_string());
        Ok(())
    }

    fn provision(&self, name: &str) -> Result<()> {
        if name.contains("provision-fail") {
            return Err(Error::Provision("bootstrap failed".into()));
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        *self.remove_calls.lock() += 1;
        if name.contains("remove-fail") {
            return Err(Error::Remove("machine is busy".into()));
        }
        self.machines.lock().retain(|machine| machine != name);
        Ok(())
    }

    fn exist(&self, name: &str) -> bool {
        if name.contains("no-can-connect") {
            return false;
        }
        self.machines.lock().iter().any(|machine| machine == name)
    }

    fn list(&self, _node_filter: &str) -> Result<Vec<String>> {
        if *self.list_error.lock() {
            return Err(Error::List("backend unavailable".into()));
        }
        Ok(self.machines())
    }

    fn can_connect(&self, name: &str) -> bool {
        !name.contains("no-can-connect")
    }

    fn credentials(&self, name: &str) -> Result<MachineCredentials> {
        if name.contains("no-connect") {
            return Err(Error::Connect("no route to machine".into()));
        }
        Ok(MachineCredentials {
            host: format!("tcp://{name}:2376"),
            cert_path: String::new(),
            tls_verify: true,
        })
    }
}

/// Poll `cond` until it holds or roughly a second has passed. Background
/// lifecycle threads settle in microseconds with zeroed intervals, but CI
/// schedulers deserve slack.
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
