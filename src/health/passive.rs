//! Passive failure tracking.
//!
//! # Responsibilities
//! - Observe request outcomes
//! - Keep success/failure counts over a sliding time window
//! - Report the failure ratio to the weight controller
//!
//! # Design Decisions
//! - Only connection errors and 5xx count as failures
//! - 4xx are NOT failures (client error, not backend)
//! - The window is a ring of fixed-width buckets; stale buckets are cleared
//!   lazily on the next read or write

use axum::http::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{LbError, LbResult};
use crate::load_balancer::endpoint::FailureRate;

/// True if a response status should count against the endpoint.
pub fn is_failure(status: StatusCode) -> bool {
    status.is_server_error()
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
struct Window {
    buckets: Vec<Bucket>,
    /// Absolute index of the most recently touched bucket.
    last: u64,
}

/// Failure ratio over a sliding window.
#[derive(Debug)]
pub struct RollingMeter {
    clock: Arc<dyn Clock>,
    origin: Instant,
    resolution: Duration,
    window: Mutex<Window>,
}

impl RollingMeter {
    /// Create a meter covering `window`, split into `buckets` slices.
    pub fn new(clock: Arc<dyn Clock>, window: Duration, buckets: usize) -> LbResult<Self> {
        if buckets == 0 {
            return Err(LbError::InvalidConfiguration(
                "meter needs at least one bucket".to_string(),
            ));
        }
        let slices = u32::try_from(buckets).map_err(|_| {
            LbError::InvalidConfiguration(format!("meter cannot have {} buckets", buckets))
        })?;
        let resolution = window / slices;
        if resolution.is_zero() {
            return Err(LbError::InvalidConfiguration(format!(
                "meter window {:?} is too short for {} buckets",
                window, buckets
            )));
        }

        let origin = clock.now();
        Ok(Self {
            clock,
            origin,
            resolution,
            window: Mutex::new(Window {
                buckets: vec![Bucket::default(); buckets],
                last: 0,
            }),
        })
    }

    pub fn mark_success(&self) {
        self.update(|b| b.successes += 1);
    }

    pub fn mark_failure(&self) {
        self.update(|b| b.failures += 1);
    }

    /// Record a response by status code.
    pub fn record_status(&self, status: StatusCode) {
        if is_failure(status) {
            self.mark_failure();
        } else {
            self.mark_success();
        }
    }

    /// Successes and failures currently inside the window.
    pub fn counts(&self) -> (u64, u64) {
        let mut window = self.window.lock().expect("meter mutex poisoned");
        self.roll(&mut window);
        window
            .buckets
            .iter()
            .fold((0, 0), |(s, f), b| (s + b.successes, f + b.failures))
    }

    fn update(&self, f: impl FnOnce(&mut Bucket)) {
        let mut window = self.window.lock().expect("meter mutex poisoned");
        self.roll(&mut window);
        let len = window.buckets.len() as u64;
        let slot = (window.last % len) as usize;
        f(&mut window.buckets[slot]);
    }

    /// Clear buckets that fell out of the window since the last access.
    fn roll(&self, window: &mut Window) {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        let current = (elapsed.as_nanos() / self.resolution.as_nanos()) as u64;
        if current <= window.last {
            return;
        }

        let len = window.buckets.len() as u64;
        let gap = current - window.last;
        if gap >= len {
            window.buckets.fill(Bucket::default());
        } else {
            for i in 1..=gap {
                window.buckets[((window.last + i) % len) as usize] = Bucket::default();
            }
        }
        window.last = current;
    }
}

impl FailureRate for RollingMeter {
    fn rate(&self) -> f64 {
        let (successes, failures) = self.counts();
        let total = successes + failures;
        if total == 0 {
            return 0.0;
        }
        failures as f64 / total as f64
    }

    fn mark_success(&self) {
        RollingMeter::mark_success(self);
    }

    fn mark_failure(&self) {
        RollingMeter::mark_failure(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn meter() -> (Arc<ManualClock>, RollingMeter) {
        let clock = Arc::new(ManualClock::new());
        let meter = RollingMeter::new(clock.clone(), Duration::from_secs(10), 10).unwrap();
        (clock, meter)
    }

    #[test]
    fn test_empty_meter_reports_zero() {
        let (_, meter) = meter();
        assert_eq!(meter.rate(), 0.0);
    }

    #[test]
    fn test_rate() {
        let (_, meter) = meter();
        meter.mark_success();
        meter.mark_success();
        meter.mark_success();
        meter.mark_failure();
        assert_eq!(meter.counts(), (3, 1));
        assert_eq!(meter.rate(), 0.25);
    }

    #[test]
    fn test_status_classification() {
        let (_, meter) = meter();
        meter.record_status(StatusCode::OK);
        meter.record_status(StatusCode::NOT_FOUND);
        meter.record_status(StatusCode::BAD_GATEWAY);
        assert_eq!(meter.counts(), (2, 1));
    }

    #[test]
    fn test_old_buckets_expire() {
        let (clock, meter) = meter();
        meter.mark_failure();

        clock.advance(Duration::from_secs(5));
        meter.mark_success();
        assert_eq!(meter.counts(), (1, 1));

        // The failure is now 10s old and has left the window.
        clock.advance(Duration::from_secs(5));
        assert_eq!(meter.counts(), (1, 0));
        assert_eq!(meter.rate(), 0.0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(meter.counts(), (0, 0));
    }

    #[test]
    fn test_invalid_settings() {
        let clock = Arc::new(ManualClock::new());
        assert!(RollingMeter::new(clock.clone(), Duration::from_secs(10), 0).is_err());
        assert!(RollingMeter::new(clock, Duration::from_nanos(5), 10).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_bucket_count_beyond_u32_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let err = RollingMeter::new(clock, Duration::from_secs(10), 1usize << 32).unwrap_err();
        assert!(matches!(err, LbError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_outcomes_through_failure_rate() {
        let (_, meter) = meter();
        let meter: Arc<dyn FailureRate> = Arc::new(meter);
        meter.mark_failure();
        meter.mark_success();
        assert_eq!(meter.rate(), 0.5);
    }
}
