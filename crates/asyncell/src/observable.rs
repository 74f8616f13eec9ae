//! Background computations and the table that coalesces them by
//! fingerprint.
//!
//! Workers never touch scheduler state. They post a [`Delivery`] into an
//! mpsc inbox that the scheduler drains at the start of every call.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;

use asyncell_common::{CellRef, ResolvedReference, XlValue};
use rayon::ThreadPool;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::call::{CallArguments, CallError, CallService, failure_text};
use crate::diagnostics::{describe_call, describe_reference};
use crate::error::AsyncError;
use crate::fingerprint::CallFingerprint;
use crate::host::RecalcNotifier;

/// Where computations run.
pub enum Workers {
    /// A named thread per computation. Services may block for as long as
    /// they like without holding up any other call.
    Dedicated { spawned: AtomicU64 },
    /// At most `n` computations at once; the rest queue on the pool.
    Bounded(ThreadPool),
}

impl Workers {
    pub fn new(max_threads: Option<usize>) -> Result<Self, AsyncError> {
        Ok(match max_threads {
            None => Workers::Dedicated {
                spawned: AtomicU64::new(0),
            },
            Some(n) => Workers::Bounded(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("asyncell-worker-{i}"))
                    .build()?,
            ),
        })
    }

    /// Pool size, `None` when every computation gets its own thread.
    pub fn max_threads(&self) -> Option<usize> {
        match self {
            Workers::Dedicated { .. } => None,
            Workers::Bounded(pool) => Some(pool.current_num_threads()),
        }
    }
}

/// A finished computation's terminal value.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub fingerprint: Arc<CallFingerprint>,
    pub caller: CellRef,
    pub value: XlValue,
}

/// One unit of work: call the service once, deliver whatever comes back.
pub struct ObservableComputation {
    fingerprint: Arc<CallFingerprint>,
    caller: CellRef,
    reference: ResolvedReference,
    args: CallArguments,
    service: Arc<dyn CallService>,
    notifier: Option<Arc<dyn RecalcNotifier>>,
    outbox: Sender<Delivery>,
}

impl ObservableComputation {
    pub fn new(
        fingerprint: Arc<CallFingerprint>,
        caller: CellRef,
        reference: ResolvedReference,
        args: CallArguments,
        service: Arc<dyn CallService>,
        notifier: Option<Arc<dyn RecalcNotifier>>,
        outbox: Sender<Delivery>,
    ) -> Self {
        Self {
            fingerprint,
            caller,
            reference,
            args,
            service,
            notifier,
            outbox,
        }
    }

    /// Run on `workers` without blocking the caller.
    pub fn start(self, workers: &Workers) {
        match workers {
            Workers::Bounded(pool) => pool.spawn(move || self.run()),
            Workers::Dedicated { spawned } => {
                let n = spawned.fetch_add(1, Ordering::Relaxed);
                let fingerprint = Arc::clone(&self.fingerprint);
                let caller = self.caller;
                let function_name = self.args.function_name.clone();
                let notifier = self.notifier.clone();
                let outbox = self.outbox.clone();

                let handle = thread::Builder::new()
                    .name(format!("asyncell-call-{n}"))
                    .spawn(move || self.run());
                if let Err(err) = handle {
                    error!(%caller, %fingerprint, %err, "could not start worker thread");
                    let delivery = Delivery {
                        fingerprint: Arc::clone(&fingerprint),
                        caller,
                        value: XlValue::Text(failure_text(&function_name)),
                    };
                    if outbox.send(delivery).is_ok() {
                        if let Some(notifier) = notifier {
                            notifier.result_ready(&caller, &fingerprint);
                        }
                    }
                }
            }
        }
    }

    fn run(self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.service.call(&self.reference, &self.args)
        }));

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(CallError::Evaluation {
                message,
                replacement,
            })) => {
                self.log_failure(&message);
                replacement
            }
            Ok(Err(CallError::Failed(message))) => {
                self.log_failure(&message);
                XlValue::Text(failure_text(&self.args.function_name))
            }
            Err(panic) => {
                self.log_failure(&panic_message(panic.as_ref()));
                XlValue::Text(failure_text(&self.args.function_name))
            }
        };

        let delivery = Delivery {
            fingerprint: Arc::clone(&self.fingerprint),
            caller: self.caller,
            value,
        };
        if self.outbox.send(delivery).is_err() {
            trace!(fingerprint = %self.fingerprint, "scheduler gone; delivery dropped");
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.result_ready(&self.caller, &self.fingerprint);
        }
    }

    fn log_failure(&self, message: &str) {
        error!(
            "Error at: {}\nconverted params: {}: {}",
            describe_reference(Some(&self.reference)),
            describe_call(&self.args.function_name, &self.args.converted_args),
            message
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "call service panicked".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    InFlight,
    Delivered(XlValue),
}

/// What a lookup found for a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Ready(XlValue),
    Pending,
    Unknown,
}

/// Fingerprint → computation slot, plus the delivery inbox.
pub struct ObservableTable {
    slots: FxHashMap<Arc<CallFingerprint>, Slot>,
    inbox: Receiver<Delivery>,
    outbox: Sender<Delivery>,
    started: u64,
}

impl Default for ObservableTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableTable {
    pub fn new() -> Self {
        let (outbox, inbox) = channel();
        Self {
            slots: FxHashMap::default(),
            inbox,
            outbox,
            started: 0,
        }
    }

    pub fn outbox(&self) -> Sender<Delivery> {
        self.outbox.clone()
    }

    pub fn observe(&self, fingerprint: &CallFingerprint) -> Observation {
        match self.slots.get(fingerprint) {
            Some(Slot::Delivered(v)) => Observation::Ready(v.clone()),
            Some(Slot::InFlight) => Observation::Pending,
            None => Observation::Unknown,
        }
    }

    /// Record that a computation for `fingerprint` has been started.
    pub fn begin(&mut self, fingerprint: Arc<CallFingerprint>) {
        self.started += 1;
        self.slots.insert(fingerprint, Slot::InFlight);
    }

    /// Number of computations started over the table's lifetime.
    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every slot. Late deliveries for them will be discarded.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Move every waiting delivery into its slot without blocking. Returns
    /// the deliveries that landed; those without a live slot are dropped.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut landed = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(delivery) => match self.slots.get_mut(&delivery.fingerprint) {
                    Some(slot) if *slot == Slot::InFlight => {
                        *slot = Slot::Delivered(delivery.value.clone());
                        landed.push(delivery);
                    }
                    Some(_) => {
                        trace!(fingerprint = %delivery.fingerprint, "duplicate delivery ignored");
                    }
                    None => {
                        trace!(
                            fingerprint = %delivery.fingerprint,
                            caller = %delivery.caller,
                            "stale delivery dropped"
                        );
                    }
                },
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        landed
    }
}
