pub mod batch;
pub mod call;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fingerprint;
pub mod force;
pub mod host;
pub mod observable;
pub mod precedents;
pub mod scheduler;
pub mod state;
pub mod test_host;

#[cfg(test)]
mod tests;

pub use call::{CallArguments, CallError, CallService, NullCallService, failure_text};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::AsyncError;
pub use fingerprint::{CallFingerprint, Payload, Scalar};
pub use force::{ForcePolicy, NeverForce};
pub use host::{FormulaSource, Host, HostError, RecalcNotifier};
pub use precedents::{CalledFunction, PrecedentResolver};
pub use scheduler::{AsyncScheduler, CALLER_UNAVAILABLE, CalcResult};
pub use state::EvalState;

pub use asyncell_common::{
    CALCULATING, CellRef, ExcelErrorKind, ResolvedReference, SCHEDULED, SheetId, XlValue,
};
