use std::sync::Arc;
use std::time::Duration;

use asyncell_common::{CALCULATING, CellRef, ResolvedReference, SCHEDULED, XlValue};
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::batch::BatchLifecycle;
use crate::call::{CallArguments, CallService};
use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::diagnostics::{describe_call, status_line};
use crate::error::AsyncError;
use crate::fingerprint::CallFingerprint;
use crate::force::{ForcePolicy, NeverForce};
use crate::host::{Host, RecalcNotifier};
use crate::observable::{ObservableComputation, ObservableTable, Observation, Workers};
use crate::precedents::{CalledFunction, PrecedentResolver};
use crate::state::{EvalState, StateCounts};

/// Shown in the cell when the host cannot say which cell is calling.
pub const CALLER_UNAVAILABLE: &str = "Error getting reference.";

/// Outcome of one [`AsyncScheduler::calc`] invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CalcResult {
    /// A precedent is still busy; nothing was started.
    Scheduled,
    /// This cell's computation is in flight.
    Calculating,
    Value(XlValue),
}

impl CalcResult {
    pub fn is_pending(&self) -> bool {
        !matches!(self, CalcResult::Value(_))
    }

    /// What the cell should display.
    pub fn into_value(self) -> XlValue {
        match self {
            CalcResult::Scheduled => XlValue::text(SCHEDULED),
            CalcResult::Calculating => XlValue::text(CALCULATING),
            CalcResult::Value(v) => v,
        }
    }
}

impl From<CalcResult> for XlValue {
    fn from(result: CalcResult) -> Self {
        result.into_value()
    }
}

/// Coordinates async calls for a host that re-invokes cells until they
/// settle.
///
/// All state lives here and is touched only from the thread that calls
/// [`calc`](Self::calc). Worker threads report back through a channel that
/// is drained at the top of every call.
pub struct AsyncScheduler<H: Host> {
    host: H,
    service: Arc<dyn CallService>,
    config: SchedulerConfig,
    workers: Workers,
    clock: Arc<dyn Clock>,
    force_policy: Box<dyn ForcePolicy>,
    notifier: Option<Arc<dyn RecalcNotifier>>,

    known_funcs: FxHashSet<String>,
    batch: BatchLifecycle,
    eval_states: FxHashMap<CellRef, EvalState>,
    calculating: FxHashMap<CellRef, Arc<CallFingerprint>>,
    calculated: FxHashSet<CalledFunction>,
    precedents: PrecedentResolver,
    observables: ObservableTable,
}

impl<H: Host> AsyncScheduler<H> {
    pub fn new<S: CallService>(
        host: H,
        service: S,
        config: SchedulerConfig,
    ) -> Result<Self, AsyncError> {
        Self::with_shared_service(host, Arc::new(service), config)
    }

    pub fn with_shared_service(
        host: H,
        service: Arc<dyn CallService>,
        config: SchedulerConfig,
    ) -> Result<Self, AsyncError> {
        let workers = Workers::new(config.max_threads)?;

        host.set_throttle_interval(config.throttle_interval);

        Ok(Self {
            host,
            service,
            config,
            workers,
            clock: Arc::new(SystemClock),
            force_policy: Box::new(NeverForce),
            notifier: None,
            known_funcs: FxHashSet::default(),
            batch: BatchLifecycle::default(),
            eval_states: FxHashMap::default(),
            calculating: FxHashMap::default(),
            calculated: FxHashSet::default(),
            precedents: PrecedentResolver::new(),
            observables: ObservableTable::new(),
        })
    }

    pub fn with_force_policy(mut self, policy: impl ForcePolicy + 'static) -> Self {
        self.force_policy = Box::new(policy);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RecalcNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /* ─────────────── accessors ─────────────── */

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn batch_id(&self) -> u64 {
        self.batch.id()
    }

    pub fn eval_state(&self, cell: &CellRef) -> Option<EvalState> {
        self.eval_states.get(cell).copied()
    }

    pub fn is_calculating(&self, cell: &CellRef) -> bool {
        self.calculating.contains_key(cell)
    }

    pub fn is_calculated(&self, cell: &CellRef, function_name: &str) -> bool {
        self.calculated
            .contains(&CalledFunction::new(*cell, function_name))
    }

    /// Computations started since the scheduler was built.
    pub fn computations_started(&self) -> u64 {
        self.observables.started()
    }

    pub fn status_line(&self) -> String {
        status_line(self.batch.id(), StateCounts::tally(self.eval_states.values()))
    }

    /* ─────────────── registration ─────────────── */

    pub fn register_async_func(&mut self, function_name: &str) {
        self.known_funcs.insert(function_name.to_ascii_lowercase());
    }

    pub fn is_registered(&self, function_name: &str) -> bool {
        self.known_funcs
            .contains(&function_name.to_ascii_lowercase())
    }

    fn ensure_registered(&self, function_name: &str) -> Result<(), AsyncError> {
        if self.is_registered(function_name) {
            Ok(())
        } else {
            Err(AsyncError::NotRegistered {
                function: function_name.to_string(),
            })
        }
    }

    /* ─────────────── entry points ─────────────── */

    /// Evaluate `function_name(raw_args)` for the host's current caller.
    pub fn calc(
        &mut self,
        function_name: &str,
        raw_args: &[XlValue],
    ) -> Result<CalcResult, AsyncError> {
        self.ensure_registered(function_name)?;
        self.host.mark_non_volatile();

        let caller = match self.host.caller() {
            Ok(caller) => caller,
            Err(err) => {
                error!(
                    %err,
                    "{}",
                    describe_call(function_name, raw_args)
                );
                return Ok(CalcResult::Value(XlValue::text(CALLER_UNAVAILABLE)));
            }
        };

        self.evaluate(function_name, raw_args, caller)
    }

    /// Same as [`calc`](Self::calc) with the caller supplied directly.
    pub fn calc_for(
        &mut self,
        function_name: &str,
        raw_args: &[XlValue],
        caller: CellRef,
    ) -> Result<CalcResult, AsyncError> {
        self.ensure_registered(function_name)?;
        self.evaluate(function_name, raw_args, caller)
    }

    fn evaluate(
        &mut self,
        function_name: &str,
        raw_args: &[XlValue],
        caller: CellRef,
    ) -> Result<CalcResult, AsyncError> {
        let now = self.clock.now();
        self.drain_deliveries();

        if self.is_new_batch(now) {
            self.begin_batch(now);
        }

        let fingerprint = Arc::new(CallFingerprint::for_call(
            function_name,
            raw_args,
            caller,
            self.batch.stamp(),
        )?);

        let same_in_flight = self
            .calculating
            .get(&caller)
            .is_some_and(|fp| **fp == *fingerprint);
        let waiting = self
            .eval_states
            .get(&caller)
            .is_some_and(|s| s.is_waiting());

        if !same_in_flight || waiting {
            if let Some(busy) = self.busy_precedent(&caller) {
                debug!(%caller, precedent = %busy, "precedent still calculating");
                self.set_state(caller, EvalState::Scheduled, &fingerprint, now);
                return Ok(CalcResult::Scheduled);
            }
            if let Some(state) = self.force_precedent(&caller) {
                self.set_state(caller, state, &fingerprint, now);
                return Ok(CalcResult::Scheduled);
            }
        }

        self.check_sentinels(raw_args)?;

        match self.observables.observe(&fingerprint) {
            Observation::Ready(value) => {
                self.set_state(caller, EvalState::Finished, &fingerprint, now);
                Ok(CalcResult::Value(value))
            }
            Observation::Pending => {
                self.set_state(caller, EvalState::Computing, &fingerprint, now);
                Ok(CalcResult::Calculating)
            }
            Observation::Unknown => {
                self.start_computation(function_name, raw_args, caller, &fingerprint);
                self.set_state(caller, EvalState::Computing, &fingerprint, now);
                Ok(CalcResult::Calculating)
            }
        }
    }

    /* ─────────────── batch lifecycle ─────────────── */

    fn idle_threshold(&self) -> Duration {
        self.host
            .throttle_interval()
            .unwrap_or(self.config.throttle_interval)
            + self.config.batch_idle_margin
    }

    fn is_new_batch(&self, now: DateTime<Utc>) -> bool {
        self.eval_states.values().all(|s| s.is_finished())
            && self.batch.is_idle(now, self.idle_threshold())
    }

    fn begin_batch(&mut self, now: DateTime<Utc>) {
        self.eval_states.clear();
        self.calculating.clear();
        self.calculated.clear();
        self.precedents.clear();
        self.observables.clear();
        let id = self.batch.begin(now);
        info!(batch = id, "async evaluation batch started");
    }

    /// Move finished work into its slots. The caller stays in its current
    /// state until it is re-invoked and reads the value.
    fn drain_deliveries(&mut self) {
        for delivery in self.observables.drain() {
            debug!(
                caller = %delivery.caller,
                fingerprint = %delivery.fingerprint,
                "result ready"
            );
        }
    }

    /* ─────────────── admission ─────────────── */

    fn busy_precedent(&mut self, caller: &CellRef) -> Option<CellRef> {
        self.precedents
            .dependency_references(&self.host, caller)
            .into_iter()
            .find(|cell| self.calculating.contains_key(cell))
    }

    /// First registered precedent function that has not produced a value
    /// this batch and that the policy wants recomputed. Only that one is
    /// forced.
    fn force_precedent(&mut self, caller: &CellRef) -> Option<EvalState> {
        let calls = self
            .precedents
            .dependency_function_calls(&self.host, caller);

        for call in calls {
            if !self.is_registered(&call.name) || self.calculated.contains(&call) {
                continue;
            }
            if !self
                .force_policy
                .should_force(caller, &call.cell, &call.name)
            {
                continue;
            }
            if self.eval_states.contains_key(&call.cell) {
                debug!(%caller, precedent = %call.cell, "precedent already tracked; waiting");
                return Some(EvalState::Scheduled);
            }
            return match self.host.queue_force_recalculate(&call.cell) {
                Ok(()) => {
                    debug!(
                        %caller,
                        precedent = %call.cell,
                        function = %call.name,
                        "forced recompute queued"
                    );
                    Some(EvalState::ForcingDependencyUpdate)
                }
                Err(err) => {
                    error!(%caller, precedent = %call.cell, %err, "forced recompute failed");
                    Some(EvalState::Scheduled)
                }
            };
        }
        None
    }

    fn check_sentinels(&self, raw_args: &[XlValue]) -> Result<(), AsyncError> {
        let found = raw_args
            .iter()
            .enumerate()
            .find_map(|(i, arg)| arg.sentinel().map(|s| (i, s)));
        let Some((position, sentinel)) = found else {
            return Ok(());
        };
        if self.config.strict_sentinel_check {
            return Err(AsyncError::SentinelArgument { sentinel, position });
        }
        warn!(position, sentinel, "placeholder passed as an argument");
        Ok(())
    }

    fn start_computation(
        &mut self,
        function_name: &str,
        raw_args: &[XlValue],
        caller: CellRef,
        fingerprint: &Arc<CallFingerprint>,
    ) {
        let args = CallArguments::convert(&self.host, function_name, raw_args);
        let reference = self.host.resolve(&caller).unwrap_or_else(|err| {
            warn!(%caller, %err, "caller could not be resolved");
            ResolvedReference::unresolved(caller)
        });
        debug!(
            %caller,
            %fingerprint,
            "starting {}",
            describe_call(function_name, &args.converted_args)
        );

        self.observables.begin(Arc::clone(fingerprint));
        ObservableComputation::new(
            Arc::clone(fingerprint),
            caller,
            reference,
            args,
            Arc::clone(&self.service),
            self.notifier.clone(),
            self.observables.outbox(),
        )
        .start(&self.workers);
    }

    /* ─────────────── state ─────────────── */

    fn set_state(
        &mut self,
        caller: CellRef,
        state: EvalState,
        fingerprint: &Arc<CallFingerprint>,
        now: DateTime<Utc>,
    ) {
        let previous = self.eval_states.insert(caller, state);

        match state {
            EvalState::Scheduled | EvalState::Computing | EvalState::ForcingDependencyUpdate => {
                for cell in constituents(caller) {
                    self.calculating.insert(cell, Arc::clone(fingerprint));
                }
            }
            EvalState::Finished => {
                for cell in constituents(caller) {
                    self.calculating.remove(&cell);
                    self.calculated
                        .insert(CalledFunction::new(cell, fingerprint.function_name()));
                }
                if self.eval_states.values().all(|s| s.is_finished()) {
                    self.batch.mark_finished(now);
                }
            }
        }

        if previous != Some(state) {
            debug!(
                %caller,
                from = ?previous,
                to = %state,
                batch = self.batch.id(),
                "eval state changed"
            );
            if self.config.status_messages {
                self.host.queue_status_message(&self.status_line());
            }
        }
    }
}

impl<H: Host> Drop for AsyncScheduler<H> {
    fn drop(&mut self) {
        self.host
            .set_throttle_interval(self.config.restore_throttle_interval);
    }
}

/// The caller plus, for multi-cell callers, every single cell inside it.
fn constituents(cell: CellRef) -> SmallVec<[CellRef; 4]> {
    let mut out = SmallVec::new();
    out.push(cell);
    if !cell.is_single_cell() {
        out.extend(cell.cells());
    }
    out
}
