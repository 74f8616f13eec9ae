use thiserror::Error;

/// Usage errors raised by [`AsyncScheduler::calc`](crate::AsyncScheduler::calc).
///
/// Host faults and call-service failures never surface here; they become
/// displayable cell values instead.
#[derive(Debug, Error)]
pub enum AsyncError {
    #[error("function '{function}' is not registered as an async function")]
    NotRegistered { function: String },

    #[error("argument payload cannot be fingerprinted: {reason}")]
    InvalidPayload { reason: String },

    #[error("argument {position} carries the placeholder '{sentinel}'")]
    SentinelArgument {
        sentinel: &'static str,
        position: usize,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
