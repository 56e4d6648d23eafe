//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint identified by its URL
//! - Hold the operator-configured (original) weight
//! - Hold the effective weight used for selection, adjusted by the controller
//! - Expose the endpoint's recent failure rate through its meter

use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use url::Url;

use crate::error::{LbError, LbResult};

/// Source of an endpoint's recent failure ratio.
///
/// Implementations must be cheap and non-blocking: the controller reads every
/// endpoint's rate on each tick.
pub trait FailureRate: Send + Sync + Debug {
    /// Recent ratio of failed to total requests, in `[0, 1]`.
    fn rate(&self) -> f64;

    /// Count a request that succeeded. Meters fed from elsewhere ignore it.
    fn mark_success(&self) {}

    /// Count a request that failed. Meters fed from elsewhere ignore it.
    fn mark_failure(&self) {}
}

/// A single backend endpoint.
#[derive(Debug)]
pub struct Endpoint {
    url: Url,
    original_weight: u32,
    effective_weight: AtomicU32,
    meter: Arc<dyn FailureRate>,
}

impl Endpoint {
    /// Create an endpoint. The effective weight starts at the original weight.
    pub fn new(url: Url, weight: u32, meter: Arc<dyn FailureRate>) -> LbResult<Self> {
        if weight == 0 {
            return Err(LbError::InvalidConfiguration(format!(
                "endpoint {} must have a weight of at least 1",
                url
            )));
        }
        Ok(Self {
            url,
            original_weight: weight,
            effective_weight: AtomicU32::new(weight),
            meter,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The weight the endpoint was configured with.
    pub fn original_weight(&self) -> u32 {
        self.original_weight
    }

    /// The weight currently used for selection.
    pub fn effective_weight(&self) -> u32 {
        self.effective_weight.load(Ordering::Acquire)
    }

    /// Overwrite the effective weight. Values below 1 are clamped to 1 so a
    /// demoted endpoint keeps receiving some traffic.
    pub(crate) fn set_effective_weight(&self, weight: u32) {
        self.effective_weight.store(weight.max(1), Ordering::Release);
    }

    /// Current failure rate as reported by the meter, clamped to `[0, 1]`.
    pub fn fail_rate(&self) -> f64 {
        let rate = self.meter.rate();
        if rate.is_nan() {
            return 0.0;
        }
        rate.clamp(0.0, 1.0)
    }

    /// Record the outcome of a request this endpoint served.
    pub fn record(&self, failed: bool) {
        if failed {
            self.meter.mark_failure();
        } else {
            self.meter.mark_success();
        }
    }

    /// True when the controller has moved the weight away from its original.
    pub fn is_adjusted(&self) -> bool {
        self.effective_weight() != self.original_weight
    }
}
