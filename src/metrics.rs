//! Run counters and the error-rate check.
//!
//! Two counters are shared by every batch task of a run:
//!
//! - **processed** - shard writes that succeeded
//! - **errors** - rejected lines, unencodable records and failed shard writes
//!
//! Both only ever grow, with relaxed atomic increments; they are read after
//! all tasks have joined. The resulting verdict is advisory: it is logged but
//! changes neither control flow nor the exit status.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

/// Default acceptable error rate.
pub const NORMAL_ERR_RATE: f64 = 0.01;

#[derive(Debug, Default)]
pub struct RunCounters {
    errors: AtomicU64,
    processed: AtomicU64,
}

impl RunCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Current error rate; see [`error_rate`].
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        error_rate(self.errors(), self.processed())
    }
}

/// `errors / processed`.
///
/// With nothing processed the rate is `0.0` when there were no errors either
/// and `f64::INFINITY` otherwise.
#[must_use]
pub fn error_rate(errors: u64, processed: u64) -> f64 {
    match (errors, processed) {
        (0, _) => 0.0,
        (_, 0) => f64::INFINITY,
        (e, p) => e as f64 / p as f64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Acceptable,
    HighErrorRate,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptable => f.write_str("acceptable"),
            Self::HighErrorRate => f.write_str("high error rate"),
        }
    }
}

/// Classify `rate` against `threshold`: strictly below is acceptable.
#[must_use]
pub fn check_error_rate(rate: f64, threshold: f64) -> Verdict {
    if rate < threshold {
        Verdict::Acceptable
    } else {
        Verdict::HighErrorRate
    }
}

/// Log the verdict for the counters' current state and return it.
pub fn report_error_rate(counters: &RunCounters, threshold: f64) -> Verdict {
    let rate = counters.error_rate();
    let verdict = check_error_rate(rate, threshold);
    match verdict {
        Verdict::Acceptable => info!(
            rate,
            errors = counters.errors(),
            processed = counters.processed(),
            "acceptable error rate"
        ),
        Verdict::HighErrorRate => error!(
            rate,
            threshold,
            errors = counters.errors(),
            processed = counters.processed(),
            "high error rate, failed load"
        ),
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn counters(errors: u64, processed: u64) -> RunCounters {
        let c = RunCounters::new();
        (0..errors).for_each(|_| c.inc_errors());
        (0..processed).for_each(|_| c.inc_processed());
        c
    }

    #[test]
    fn clean_run_is_acceptable() {
        let c = counters(0, 100);
        assert_eq!(c.error_rate(), 0.0);
        assert_eq!(report_error_rate(&c, NORMAL_ERR_RATE), Verdict::Acceptable);
    }

    #[test]
    fn two_percent_exceeds_one_percent() {
        let c = counters(2, 100);
        assert!((c.error_rate() - 0.02).abs() < 1e-12);
        assert_eq!(report_error_rate(&c, NORMAL_ERR_RATE), Verdict::HighErrorRate);
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(check_error_rate(0.01, 0.01), Verdict::HighErrorRate);
        assert_eq!(check_error_rate(0.0099, 0.01), Verdict::Acceptable);
    }

    #[test]
    fn nothing_processed() {
        assert_eq!(error_rate(0, 0), 0.0);
        assert!(error_rate(3, 0).is_infinite());
        assert_eq!(check_error_rate(error_rate(3, 0), NORMAL_ERR_RATE), Verdict::HighErrorRate);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let c = Arc::new(RunCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.inc_processed();
                        c.inc_errors();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.processed(), 8000);
        assert_eq!(c.errors(), 8000);
    }
}
