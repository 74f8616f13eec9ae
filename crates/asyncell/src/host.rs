//! Seams to the spreadsheet host.
//!
//! Every query is synchronous and may fail. The scheduler only ever calls
//! these from the host's calculation thread, except [`RecalcNotifier`],
//! which worker threads call when a value is ready.

use std::time::Duration;

use asyncell_common::{CellRef, ResolvedReference, SheetId, XlValue};
use thiserror::Error;

use crate::fingerprint::CallFingerprint;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("no calling cell is available")]
    NoCaller,
    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),
    #[error("reference {0} is not available")]
    Unavailable(CellRef),
    #[error("{0}")]
    Other(String),
}

/// Read-only formula access used by precedent discovery.
pub trait FormulaSource {
    fn is_formula(&self, cell: &CellRef) -> Result<bool, HostError>;

    /// Formula text including the leading `=`.
    fn formula_text(&self, cell: &CellRef) -> Result<String, HostError>;

    /// Handle for a sheet named in formula text, in the same workbook as
    /// the cell being inspected.
    fn sheet_id(&self, name: &str) -> Result<SheetId, HostError>;
}

pub trait Host: FormulaSource {
    /// The cell whose formula is currently being evaluated.
    fn caller(&self) -> Result<CellRef, HostError>;

    fn read_value(&self, cell: &CellRef) -> Result<XlValue, HostError>;

    fn resolve(&self, cell: &CellRef) -> Result<ResolvedReference, HostError>;

    /// Re-enter the formula at `cell` later, from a context that allows
    /// side effects. Array formulas are re-entered as arrays.
    fn queue_force_recalculate(&self, cell: &CellRef) -> Result<(), HostError>;

    /// Undo the volatility the host assigns to functions that take
    /// references.
    fn mark_non_volatile(&self) {}

    fn set_throttle_interval(&self, _interval: Duration) {}

    /// Current delivery throttle, when the host reports one.
    fn throttle_interval(&self) -> Option<Duration> {
        None
    }

    fn queue_status_message(&self, _text: &str) {}
}

/// Told when a delivered value can be read back by re-invoking `caller`.
pub trait RecalcNotifier: Send + Sync {
    fn result_ready(&self, caller: &CellRef, fingerprint: &CallFingerprint);
}

impl<F> RecalcNotifier for F
where
    F: Fn(&CellRef, &CallFingerprint) + Send + Sync,
{
    fn result_ready(&self, caller: &CellRef, fingerprint: &CallFingerprint) {
        self(caller, fingerprint)
    }
}
