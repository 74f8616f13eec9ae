use asyncell_common::CellRef;

/// Decides whether a precedent that has not produced a value this batch
/// must be recomputed before `caller` may run, even though the host does
/// not consider it dirty. Useful when a function returns a handle to state
/// that has to be rebuilt for each dependent.
pub trait ForcePolicy: Send + Sync {
    fn should_force(&self, caller: &CellRef, precedent: &CellRef, precedent_function: &str) -> bool;
}

/// Never forces; the host's own dirty tracking is trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverForce;

impl ForcePolicy for NeverForce {
    fn should_force(&self, _: &CellRef, _: &CellRef, _: &str) -> bool {
        false
    }
}

impl<F> ForcePolicy for F
where
    F: Fn(&CellRef, &CellRef, &str) -> bool + Send + Sync,
{
    fn should_force(&self, caller: &CellRef, precedent: &CellRef, precedent_function: &str) -> bool {
        self(caller, precedent, precedent_function)
    }
}
