use std::time::Instant;

use super::slots::{normalize_heading, shortest_delta_degrees};

pub const DEFAULT_STABLE_RATE_THRESHOLD_DEG_PER_SEC: f64 = 24.0;

/// Elapsed-time floor so duplicate or out-of-order timestamps cannot blow up
/// the rate computation.
const MIN_ELAPSED_SECS: f64 = 0.001;

/// Derived orientation state, recomputed on every sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingState {
    pub heading: f64,
    pub rate_deg_per_sec: f64,
    pub stable_for_ms: u64,
}

impl Default for HeadingState {
    fn default() -> Self {
        Self {
            heading: 0.0,
            rate_deg_per_sec: 0.0,
            stable_for_ms: 0,
        }
    }
}

/// Turns raw heading samples into rate-of-change and a stability duration.
///
/// The stability anchor is set the instant the angular rate drops to the
/// threshold or below and cleared the instant it is exceeded; `stable_for_ms`
/// reads 0 while no anchor is set.
#[derive(Debug)]
pub struct HeadingTracker {
    stable_rate_threshold: f64,
    last_sample: Option<(f64, Instant)>,
    stable_since: Option<Instant>,
}

impl HeadingTracker {
    pub fn new(stable_rate_threshold_deg_per_sec: f64) -> Self {
        Self {
            stable_rate_threshold: stable_rate_threshold_deg_per_sec,
            last_sample: None,
            stable_since: None,
        }
    }

    pub fn observe(&mut self, heading: f64, timestamp: Instant) -> HeadingState {
        let rate = match self.last_sample {
            Some((prev_heading, prev_at)) => {
                let elapsed = timestamp
                    .saturating_duration_since(prev_at)
                    .as_secs_f64()
                    .max(MIN_ELAPSED_SECS);
                (shortest_delta_degrees(heading, prev_heading) / elapsed).abs()
            }
            None => 0.0,
        };

        if rate <= self.stable_rate_threshold {
            self.stable_since.get_or_insert(timestamp);
        } else {
            self.stable_since = None;
        }

        let stable_for_ms = self
            .stable_since
            .map(|since| timestamp.saturating_duration_since(since).as_millis() as u64)
            .unwrap_or(0);

        self.last_sample = Some((heading, timestamp));

        HeadingState {
            heading: normalize_heading(heading),
            rate_deg_per_sec: rate,
            stable_for_ms,
        }
    }
}

impl Default for HeadingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STABLE_RATE_THRESHOLD_DEG_PER_SEC)
    }
}
