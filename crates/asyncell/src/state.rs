use std::fmt;

/// Where a cell stands within the current batch. Cells absent from the
/// state map are unknown.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EvalState {
    /// Waiting on a busy precedent.
    Scheduled,
    /// Its computation is in flight.
    Computing,
    /// A value was delivered this batch. Only a new batch leaves this state.
    Finished,
    /// Waiting on a precedent whose recompute was queued.
    ForcingDependencyUpdate,
}

impl EvalState {
    pub fn is_finished(self) -> bool {
        self == EvalState::Finished
    }

    /// Scheduled-like states re-run the precedent checks on the next call.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            EvalState::Scheduled | EvalState::ForcingDependencyUpdate
        )
    }
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvalState::Scheduled => "scheduled",
            EvalState::Computing => "computing",
            EvalState::Finished => "finished",
            EvalState::ForcingDependencyUpdate => "forcing-dependency-update",
        };
        f.write_str(s)
    }
}

/// Per-state tallies used for the status line.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StateCounts {
    pub calculating: usize,
    pub calculated: usize,
    pub scheduled: usize,
}

impl StateCounts {
    pub fn tally<'a>(states: impl IntoIterator<Item = &'a EvalState>) -> Self {
        let mut counts = StateCounts::default();
        for state in states {
            match state {
                EvalState::Computing => counts.calculating += 1,
                EvalState::Finished => counts.calculated += 1,
                EvalState::Scheduled | EvalState::ForcingDependencyUpdate => counts.scheduled += 1,
            }
        }
        counts
    }

    pub fn all_finished(&self) -> bool {
        self.calculating == 0 && self.scheduled == 0
    }
}
