//! One wave of recalculation: an id, a start stamp, and the moment every
//! tracked cell was last seen finished.

use asyncell_common::datetime_to_serial;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct BatchLifecycle {
    id: u64,
    started: DateTime<Utc>,
    last_finished: Option<DateTime<Utc>>,
}

impl BatchLifecycle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn last_finished(&self) -> Option<DateTime<Utc>> {
        self.last_finished
    }

    /// True once the host has been quiet for longer than `threshold` since
    /// everything finished. A lifecycle that never saw a finish is idle.
    pub fn is_idle(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_finished {
            None => true,
            Some(at) => (now - at).to_std().is_ok_and(|quiet| quiet > threshold),
        }
    }

    pub fn begin(&mut self, now: DateTime<Utc>) -> u64 {
        self.id += 1;
        self.started = now;
        self.last_finished = None;
        self.id
    }

    pub fn mark_finished(&mut self, now: DateTime<Utc>) {
        self.last_finished = Some(now);
    }

    /// Batch start as a spreadsheet serial number.
    pub fn stamp(&self) -> f64 {
        datetime_to_serial(&self.started.naive_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn idle_requires_quiet_period() {
        let t0 = DateTime::<Utc>::default();
        let mut batch = BatchLifecycle::default();
        assert!(batch.is_idle(t0, Duration::from_millis(500)));

        batch.begin(t0);
        batch.mark_finished(t0);
        let threshold = Duration::from_millis(500);
        assert!(!batch.is_idle(t0 + TimeDelta::milliseconds(500), threshold));
        assert!(batch.is_idle(t0 + TimeDelta::milliseconds(501), threshold));
    }

    #[test]
    fn begin_bumps_id_and_stamp() {
        let t0 = DateTime::<Utc>::default();
        let mut batch = BatchLifecycle::default();
        assert_eq!(batch.begin(t0), 1);
        let first = batch.stamp();
        assert_eq!(batch.begin(t0 + TimeDelta::seconds(1)), 2);
        assert!(batch.stamp() > first);
        assert_eq!(batch.last_finished(), None);
    }
}
