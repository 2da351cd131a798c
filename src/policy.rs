//! Pool sizing policy
//!
//! Pure decisions over a counts snapshot; the provider applies them. The
//! per-machine sweep runs in driver list order with a running tally, so the
//! first `idle_count` idle machines survive a downscale and the rest go.

use crate::config::PoolConfig;
use crate::store::{MachineInfo, MachineState};

/// Why a machine was sent to the removing state. Rendered into the record's
/// free-form reason field for operator visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemovalReason {
    TooManyBuilds,
    TooManyMachines,
    TooManyIdle,
    FailedToCreate,
    FailedToProvision,
    NoConnect,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalReason::TooManyBuilds => write!(f, "Too many builds"),
            RemovalReason::TooManyMachines => write!(f, "Too many machines"),
            RemovalReason::TooManyIdle => write!(f, "Too many idle machines"),
            RemovalReason::FailedToCreate => write!(f, "Failed to create"),
            RemovalReason::FailedToProvision => write!(f, "Failed to provision"),
            RemovalReason::NoConnect => write!(f, "No connect"),
        }
    }
}

/// Running tally accumulated while sweeping the pool.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PoolCounts {
    pub creating: usize,
    pub idle: usize,
    pub acquired: usize,
    pub used: usize,
    pub removing: usize,
}

impl PoolCounts {
    pub(crate) fn add(&mut self, state: MachineState) {
        match state {
            MachineState::Creating => self.creating += 1,
            MachineState::Idle => self.idle += 1,
            MachineState::Acquired => self.acquired += 1,
            MachineState::Used => self.used += 1,
            MachineState::Removing => self.removing += 1,
        }
    }

    /// Machines that count against the pool limit.
    pub(crate) fn total(&self) -> usize {
        self.creating + self.idle + self.acquired + self.used
    }

    /// Machines that satisfy the warm-pool target: idle now, or about to be.
    pub(crate) fn available(&self) -> usize {
        self.creating + self.idle
    }
}

/// Judge one idle machine against the caller's policy. `counts` holds the
/// tally of machines already kept this sweep.
pub(crate) fn evaluate_machine(
    config: &PoolConfig,
    counts: &PoolCounts,
    machine: &MachineInfo,
) -> Option<RemovalReason> {
    if machine.state != MachineState::Idle {
        return None;
    }

    if config.max_builds > 0 && machine.used_count >= config.max_builds {
        return Some(RemovalReason::TooManyBuilds);
    }

    if config.limit > 0 && counts.total() >= config.limit {
        return Some(RemovalReason::TooManyMachines);
    }

    if config.idle_expired(machine.last_used.elapsed()) && counts.idle >= config.idle_count {
        return Some(RemovalReason::TooManyIdle);
    }

    None
}

/// Whether the pre-warm loop should start another background create.
pub(crate) fn should_create(config: &PoolConfig, counts: &PoolCounts) -> bool {
    if counts.available() >= config.idle_count {
        return false;
    }
    if config.limit > 0 && counts.total() >= config.limit {
        return false;
    }
    true
}
