//! In-memory registry of machine records
//!
//! The store is the only shared mutable state in the crate: a single
//! readers-writer lock guards the map and every state field. Transitions
//! that read-then-write happen entirely under the write lock; callers do
//! driver I/O outside the lock and come back to record the outcome.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Lifecycle state of a single machine record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Being created or provisioned in the background.
    Creating,
    /// Warm and ready for acquisition.
    Idle,
    /// Reserved by exactly one caller.
    Acquired,
    /// Handed out together with connection credentials.
    Used,
    /// Scheduled for driver removal; never handed out again.
    Removing,
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::Creating => write!(f, "Creating"),
            MachineState::Idle => write!(f, "Idle"),
            MachineState::Acquired => write!(f, "Acquired"),
            MachineState::Used => write!(f, "Used"),
            MachineState::Removing => write!(f, "Removing"),
        }
    }
}

#[derive(Debug)]
struct MachineRecord {
    state: MachineState,
    used_count: usize,
    retry_count: usize,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    last_used: Instant,
}

impl MachineRecord {
    fn new(state: MachineState) -> Self {
        Self {
            // A record handed straight to a caller already counts as one use.
            used_count: usize::from(matches!(
                state,
                MachineState::Acquired | MachineState::Used
            )),
            state,
            retry_count: 0,
            reason: None,
            created_at: Utc::now(),
            last_used: Instant::now(),
        }
    }
}

/// Read-only snapshot of a machine record, for operators and tests.
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub name: String,
    pub state: MachineState,
    pub used_count: usize,
    pub retry_count: usize,
    /// Why the machine entered the removing state, if it did.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Instant,
}

/// Pool counts observed atomically under one read lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub creating: usize,
    pub idle: usize,
    pub acquired: usize,
    pub used: usize,
    pub removing: usize,
    /// Machines not in the removing state.
    pub total: usize,
}

/// The authoritative map of machine name to record.
#[derive(Default)]
pub(crate) struct HostStore {
    records: RwLock<HashMap<String, MachineRecord>>,
}

impl HostStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the record's state, inserting it with `initial` when missing.
    ///
    /// Passing `initial == Acquired` for an existing record is an acquire
    /// attempt: an idle record transitions atomically and is counted as a
    /// hand-off; any other state returns `None` (unavailable).
    pub(crate) fn get_or_create(
        &self,
        name: &str,
        initial: MachineState,
    ) -> Option<MachineState> {
        let mut records = self.records.write();
        match records.get_mut(name) {
            Some(record) => {
                if initial == MachineState::Acquired {
                    if record.state != MachineState::Idle {
                        return None;
                    }
                    record.state = MachineState::Acquired;
                    record.used_count += 1;
                }
                Some(record.state)
            }
            None => {
                records.insert(name.to_string(), MachineRecord::new(initial));
                Some(initial)
            }
        }
    }

    /// Advance a record out of `Creating` into its requested terminal state.
    pub(crate) fn complete_create(&self, name: &str, target: MachineState) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(name) else {
            return false;
        };
        if record.state != MachineState::Creating {
            return false;
        }
        record.state = target;
        record.last_used = Instant::now();
        if matches!(target, MachineState::Acquired | MachineState::Used) {
            record.used_count += 1;
        }
        true
    }

    /// Return an acquired or used machine to the idle pool.
    pub(crate) fn release(&self, name: &str) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(name) else {
            return false;
        };
        if !matches!(record.state, MachineState::Acquired | MachineState::Used) {
            return false;
        }
        record.state = MachineState::Idle;
        record.last_used = Instant::now();
        true
    }

    /// Transition an acquired machine to used.
    pub(crate) fn mark_used(&self, name: &str) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(name) else {
            return false;
        };
        if !matches!(record.state, MachineState::Acquired | MachineState::Used) {
            return false;
        }
        record.state = MachineState::Used;
        record.last_used = Instant::now();
        true
    }

    /// Mark a record for removal. Idempotent for records already removing.
    pub(crate) fn mark_removing(&self, name: &str, reason: &str) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(name) else {
            return false;
        };
        if record.state == MachineState::Removing {
            return false;
        }
        record.state = MachineState::Removing;
        record.reason = Some(reason.to_string());
        record.retry_count = 0;
        record.last_used = Instant::now();
        true
    }

    pub(crate) fn bump_retry(&self, name: &str) -> usize {
        let mut records = self.records.write();
        match records.get_mut(name) {
            Some(record) => {
                record.retry_count += 1;
                record.retry_count
            }
            None => 0,
        }
    }

    /// Drop the entry once the driver confirmed removal. Only records in the
    /// removing state may be deleted.
    pub(crate) fn delete(&self, name: &str) -> bool {
        let mut records = self.records.write();
        match records.get(name) {
            Some(record) if record.state == MachineState::Removing => {
                records.remove(name);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn info(&self, name: &str) -> Option<MachineInfo> {
        let records = self.records.read();
        records.get(name).map(|record| snapshot(name, record))
    }

    pub(crate) fn machines(&self) -> Vec<MachineInfo> {
        let records = self.records.read();
        records
            .iter()
            .map(|(name, record)| snapshot(name, record))
            .collect()
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let records = self.records.read();
        let mut status = PoolStatus::default();
        for record in records.values() {
            match record.state {
                MachineState::Creating => status.creating += 1,
                MachineState::Idle => status.idle += 1,
                MachineState::Acquired => status.acquired += 1,
                MachineState::Used => status.used += 1,
                MachineState::Removing => status.removing += 1,
            }
        }
        status.total = status.creating + status.idle + status.acquired + status.used;
        status
    }
}

fn snapshot(name: &str, record: &MachineRecord) -> MachineInfo {
    MachineInfo {
        name: name.to_string(),
        state: record.state,
        used_count: record.used_count,
        retry_count: record.retry_count,
        reason: record.reason.clone(),
        created_at: record.created_at,
        last_used: record.last_used,
    }
}
