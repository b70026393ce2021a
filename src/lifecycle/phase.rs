use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Run phase of a long-lived activity. Phases only move forward:
/// `Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Running,
            1 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`Phase`].
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::Running as u8))
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Only one caller wins a given transition;
    /// backward moves are refused.
    pub fn transition(&self, from: Phase, to: Phase) -> bool {
        if to <= from {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Advances to `to` from whatever earlier phase is current. Returns false
    /// if the cell was already at or past `to`.
    pub fn advance_to(&self, to: Phase) -> bool {
        let mut current = self.get();
        while current < to {
            if self.transition(current, to) {
                return true;
            }
            current = self.get();
        }
        false
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}
