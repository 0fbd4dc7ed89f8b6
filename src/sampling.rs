//! Sampling policies
//!
//! A control step is not necessarily checked on every unit. Each control
//! owns one sampling policy whose counters are scoped to that control
//! and persist across tests.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Decides, per unit or per elapsed time, whether a control step
/// actually produces a check this cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sampling {
    /// 100 % sampling: every unit is checked
    Every,

    /// Check the first `sample_size` units of every window of
    /// `frequency` units
    CountBased {
        sample_size: u32,
        frequency: u32,
        #[serde(skip)]
        seen: u32,
        #[serde(skip)]
        sampled: u32,
    },

    /// Check once the interval has elapsed since the last check
    TimeBased {
        interval_ms: u64,
        #[serde(skip)]
        last: Option<Instant>,
    },
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling::Every
    }
}

impl Sampling {
    pub fn every() -> Self {
        Sampling::Every
    }

    pub fn count_based(sample_size: u32, frequency: u32) -> Self {
        Sampling::CountBased {
            sample_size,
            frequency,
            seen: 0,
            sampled: 0,
        }
    }

    pub fn time_based(interval: Duration) -> Self {
        Sampling::TimeBased {
            interval_ms: interval.as_millis() as u64,
            last: None,
        }
    }

    /// Count one unit arriving at the control; returns whether a check
    /// should be instantiated for it
    pub fn count(&mut self) -> bool {
        match self {
            Sampling::Every => true,
            Sampling::CountBased {
                sample_size,
                frequency,
                seen,
                sampled,
            } => {
                if *seen >= *frequency {
                    *seen = 0;
                    *sampled = 0;
                }
                *seen += 1;
                if *sampled < *sample_size {
                    *sampled += 1;
                    true
                } else {
                    false
                }
            }
            Sampling::TimeBased { interval_ms, last } => {
                let due = match last {
                    Some(at) => at.elapsed() >= Duration::from_millis(*interval_ms),
                    None => true,
                };
                if due {
                    *last = Some(Instant::now());
                }
                due
            }
        }
    }
}
