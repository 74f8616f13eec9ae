//! Shared fixtures for scheduler tests.
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use asyncell_common::{CellRef, ResolvedReference, XlValue};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::call::{CallArguments, CallError, CallService};
use crate::clock::ManualClock;
use crate::config::SchedulerConfig;
use crate::fingerprint::CallFingerprint;
use crate::scheduler::AsyncScheduler;
use crate::test_host::TestHost;

pub const WAIT: Duration = Duration::from_secs(5);

/// Sums every numeric converted argument. Blocks until the gate opens.
#[derive(Clone, Default)]
pub struct AddService {
    pub calls: Arc<AtomicUsize>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl AddService {
    pub fn open() -> Self {
        let svc = Self::default();
        svc.release();
        svc
    }

    pub fn gated() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.gate;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CallService for AddService {
    fn call(&self, _: &ResolvedReference, args: &CallArguments) -> Result<XlValue, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (lock, cvar) = &*self.gate;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
        drop(open);

        let mut sum = 0.0;
        for arg in &args.converted_args {
            match arg.as_f64() {
                Some(n) => sum += n,
                None => return Err(CallError::Failed(format!("not a number: {arg:?}"))),
            }
        }
        Ok(XlValue::Number(sum))
    }
}

pub struct Harness {
    pub host: TestHost,
    pub clock: Arc<ManualClock>,
    pub ready: Receiver<CellRef>,
    /// Notifications received while waiting for some other cell.
    early: RefCell<FxHashMap<CellRef, usize>>,
}

impl Harness {
    /// Block until a worker reports a value for `cell`. Each report is
    /// consumed once.
    pub fn wait_ready(&self, cell: CellRef) {
        if let Some(n) = self.early.borrow_mut().get_mut(&cell).filter(|n| **n > 0) {
            *n -= 1;
            return;
        }
        loop {
            let got = self
                .ready
                .recv_timeout(WAIT)
                .expect("worker did not deliver in time");
            if got == cell {
                return;
            }
            *self.early.borrow_mut().entry(got).or_insert(0) += 1;
        }
    }
}

pub fn scheduler_with<S: CallService>(
    host: TestHost,
    service: S,
    config: SchedulerConfig,
) -> (AsyncScheduler<TestHost>, Harness) {
    let clock = Arc::new(ManualClock::default());
    let (tx, ready) = mpsc::channel();
    let scheduler = AsyncScheduler::new(host.clone(), service, config)
        .unwrap()
        .with_clock(clock.clone())
        .with_notifier(Arc::new(move |caller: &CellRef, _: &CallFingerprint| {
            let _ = tx.send(*caller);
        }));
    (
        scheduler,
        Harness {
            host,
            clock,
            ready,
            early: RefCell::default(),
        },
    )
}

pub fn scheduler<S: CallService>(host: TestHost, service: S) -> (AsyncScheduler<TestHost>, Harness) {
    let config = SchedulerConfig::default()
        .with_max_threads(4)
        .with_strict_sentinel_check(true);
    scheduler_with(host, service, config)
}
