//! Lifecycle phase of the current run, shared between the orchestrator and the signal path.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use parking_lot::Mutex;

use crate::simulation::CleanupHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    Resolving = 1,
    Building = 2,
    Running = 3,
    CleaningUp = 4,
    Terminated = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::NotStarted,
            1 => Phase::Resolving,
            2 => Phase::Building,
            3 => Phase::Running,
            4 => Phase::CleaningUp,
            _ => Phase::Terminated,
        }
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::NotStarted, Phase::Resolving)
                | (Phase::Resolving, Phase::Building)
                | (Phase::Resolving, Phase::CleaningUp)
                | (Phase::Building, Phase::Running)
                | (Phase::Building, Phase::CleaningUp)
                | (Phase::Running, Phase::CleaningUp)
                | (Phase::CleaningUp, Phase::Terminated)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotStarted => "not started",
            Phase::Resolving => "resolution",
            Phase::Building => "construction",
            Phase::Running => "run",
            Phase::CleaningUp => "cleanup",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Current phase plus the cleanup handle of the simulation, once one exists.
#[derive(Debug)]
pub struct RunState {
    phase: AtomicU8,
    interrupted: AtomicBool,
    simulation: Mutex<Option<CleanupHandle>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::NotStarted as u8),
            interrupted: AtomicBool::new(false),
            simulation: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn advance(&self, next: Phase) {
        let current = self.phase();
        debug_assert!(
            current.can_advance_to(next),
            "invalid lifecycle transition {current:?} -> {next:?}"
        );
        self.phase.store(next as u8, Ordering::SeqCst);
        tracing::debug!(from = ?current, to = ?next, "Lifecycle transition");
    }

    /// Records that a termination signal owns the shutdown from now on.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Makes the simulation reachable from the signal path.
    pub fn attach(&self, handle: CleanupHandle) {
        *self.simulation.lock() = Some(handle);
    }

    pub fn cleanup_handle(&self) -> Option<CleanupHandle> {
        self.simulation.lock().clone()
    }
}
