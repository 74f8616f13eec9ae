use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scheduler tuning knobs.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Host delivery throttle applied while the scheduler is alive.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub throttle_interval: Duration,

    /// Throttle handed back to the host when the scheduler is dropped.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub restore_throttle_interval: Duration,

    /// Added to the throttle interval to get the idle time after which the
    /// next call opens a new batch.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub batch_idle_margin: Duration,

    /// Cap on concurrent computations. `None` gives each computation its
    /// own thread; `Some(n)` runs them on an `n`-thread rayon pool.
    pub max_threads: Option<usize>,

    /// Reject placeholder arguments with an error instead of logging them.
    pub strict_sentinel_check: bool,

    /// Push a progress line to the host status bar on state changes.
    pub status_messages: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::ZERO,
            restore_throttle_interval: Duration::from_millis(2000),
            batch_idle_margin: Duration::from_millis(500),
            max_threads: None,
            strict_sentinel_check: cfg!(debug_assertions),
            status_messages: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    pub fn with_strict_sentinel_check(mut self, strict: bool) -> Self {
        self.strict_sentinel_check = strict;
        self
    }
}

/// Durations as whole milliseconds in config files.
#[cfg(feature = "serde")]
mod millis {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis())
            .map_err(|_| S::Error::custom(format!("{d:?} does not fit in u64 milliseconds")))?;
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
