//! Adaptive weight controller.
//!
//! A small state machine that shifts effective weight away from endpoints
//! whose failure rate is significantly above the group average, waits for
//! the change to take effect, and rolls it back if the endpoints absorbing
//! the extra traffic got worse.
//!
//! # States
//! - Start: evaluate failure rates on every tick
//! - Probing: a demotion is in effect, waiting for the backoff to expire
//! - Rollback: a failed probe was undone, cooling down
//! - Revert: failures are gone, weights are being restored to their originals
//!
//! # State Transitions
//! ```text
//! Start → Probing:    some endpoints fail significantly more than average
//! Start → Revert:     no failures and some weight differs from its original
//! Probing → Start:    backoff expired, probed endpoints did not get worse
//! Probing → Rollback: backoff expired, a probed endpoint got worse
//! Rollback → Start:   backoff expired
//! Revert → Start:     backoff expired
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::{LbError, LbResult};
use crate::load_balancer::endpoint::Endpoint;
use crate::observability::metrics;

/// Default dwell time between experiments.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Shortest accepted backoff.
pub const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Default cap for promoted weights, as a multiple of the original weight.
pub const DEFAULT_MAX_BOOST: u32 = 4;

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Probing,
    Rollback,
    Revert,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Probing => "probing",
            Phase::Rollback => "rollback",
            Phase::Revert => "revert",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight and failure rate of an endpoint at the moment a probe began.
#[derive(Debug)]
struct ChangedEndpoint {
    endpoint: Arc<Endpoint>,
    weight_before: u32,
    fail_ratio_before: f64,
}

impl ChangedEndpoint {
    fn capture(endpoint: &Arc<Endpoint>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            weight_before: endpoint.effective_weight(),
            fail_ratio_before: endpoint.fail_rate(),
        }
    }

    fn restore(&self) {
        self.endpoint.set_effective_weight(self.weight_before);
    }
}

/// Endpoints touched by the running experiment.
#[derive(Debug, Default)]
struct Probe {
    /// Endpoints expected to absorb more traffic; their failure rates decide
    /// the outcome.
    absorbing: Vec<ChangedEndpoint>,
    /// Endpoints whose weight was lowered.
    demoted: Vec<ChangedEndpoint>,
}

impl Probe {
    fn restore(&self) {
        for changed in self.absorbing.iter().chain(self.demoted.iter()) {
            changed.restore();
        }
    }
}

#[derive(Debug)]
enum State {
    Start,
    Probing { deadline: Instant, probe: Probe },
    Rollback { deadline: Instant },
    Revert { deadline: Instant },
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Start => Phase::Start,
            State::Probing { .. } => Phase::Probing,
            State::Rollback { .. } => Phase::Rollback,
            State::Revert { .. } => Phase::Revert,
        }
    }
}

/// Failure-rate driven weight controller.
///
/// Only ever changes effective weights; membership is left to the caller.
#[derive(Debug)]
pub struct AdaptiveController {
    clock: Arc<dyn Clock>,
    backoff: Duration,
    max_boost: u32,
    state: State,
}

impl AdaptiveController {
    /// Create a controller on the system clock.
    pub fn new(backoff: Duration) -> LbResult<Self> {
        Self::with_clock(Arc::new(SystemClock), backoff)
    }

    /// Create a controller reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>, backoff: Duration) -> LbResult<Self> {
        if backoff < MIN_BACKOFF {
            return Err(LbError::InvalidConfiguration(format!(
                "backoff must be at least {:?}, got {:?}",
                MIN_BACKOFF, backoff
            )));
        }
        Ok(Self {
            clock,
            backoff,
            max_boost: DEFAULT_MAX_BOOST,
            state: State::Start,
        })
    }

    /// Cap promoted weights at `original * max_boost`.
    pub fn with_max_boost(mut self, max_boost: u32) -> LbResult<Self> {
        if max_boost == 0 {
            return Err(LbError::InvalidConfiguration(
                "max_boost must be at least 1".to_string(),
            ));
        }
        self.max_boost = max_boost;
        Ok(self)
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Drop any running experiment and return to Start. Weights are left as
    /// they are.
    pub fn reset(&mut self) {
        self.state = State::Start;
    }

    /// Run one control step over `endpoints` and return the resulting phase.
    pub fn update_weights(&mut self, endpoints: &[Arc<Endpoint>]) -> LbResult<Phase> {
        if endpoints.is_empty() {
            return Err(LbError::NoEndpoints);
        }

        let now = self.clock.now();
        let from = self.state.phase();
        let state = std::mem::replace(&mut self.state, State::Start);

        self.state = match state {
            State::Start => self.on_start(endpoints, now),
            State::Probing { deadline, probe } => {
                if expired(deadline, now) {
                    self.on_probing(probe, endpoints, now)
                } else {
                    State::Probing { deadline, probe }
                }
            }
            State::Rollback { deadline } if !expired(deadline, now) => State::Rollback { deadline },
            State::Revert { deadline } if !expired(deadline, now) => State::Revert { deadline },
            State::Rollback { .. } | State::Revert { .. } => State::Start,
        };

        let to = self.state.phase();
        if from != to {
            tracing::debug!(from = %from, to = %to, "Controller transition");
            metrics::record_controller_transition(from.as_str(), to.as_str());
        }
        Ok(to)
    }

    fn on_start(&self, endpoints: &[Arc<Endpoint>], now: Instant) -> State {
        let avg = avg_fail_rate(endpoints);

        if avg == 0.0 {
            let mut reverted = false;
            for e in endpoints.iter().filter(|e| e.is_adjusted()) {
                let weight = adjust(e.original_weight(), e.effective_weight());
                tracing::info!(
                    endpoint = %e.url(),
                    from = e.effective_weight(),
                    to = weight,
                    "Restoring endpoint weight"
                );
                e.set_effective_weight(weight);
                reverted = true;
            }
            return if reverted {
                State::Revert { deadline: now + self.backoff }
            } else {
                State::Start
            };
        }

        let (good, bad) = split_endpoints(endpoints, avg);
        if good.is_empty() || bad.is_empty() {
            return State::Start;
        }

        let absorbing: Vec<_> = good.iter().map(ChangedEndpoint::capture).collect();
        let demoted = self.demote(&bad);
        if demoted.is_empty() && !self.promote(&absorbing) {
            tracing::debug!(
                avg_fail_rate = avg,
                "Weights already at their limits, nothing to probe"
            );
            return State::Start;
        }

        tracing::info!(
            avg_fail_rate = avg,
            good = absorbing.len(),
            bad = bad.len(),
            "Probing new weights"
        );
        State::Probing {
            deadline: now + self.backoff,
            probe: Probe { absorbing, demoted },
        }
    }

    fn on_probing(&self, probe: Probe, endpoints: &[Arc<Endpoint>], now: Instant) -> State {
        let worse = probe
            .absorbing
            .iter()
            .filter(|c| endpoints.iter().any(|e| Arc::ptr_eq(e, &c.endpoint)))
            .find(|c| greater(c.endpoint.fail_rate(), c.fail_ratio_before));

        match worse {
            Some(changed) => {
                tracing::warn!(
                    endpoint = %changed.endpoint.url(),
                    before = changed.fail_ratio_before,
                    after = changed.endpoint.fail_rate(),
                    "Probe made things worse, rolling back"
                );
                probe.restore();
                State::Rollback { deadline: now + self.backoff }
            }
            None => {
                tracing::info!(probed = probe.absorbing.len(), "Probe kept");
                State::Start
            }
        }
    }

    /// Halve the weight of every bad endpoint that is still above 1.
    fn demote(&self, bad: &[Arc<Endpoint>]) -> Vec<ChangedEndpoint> {
        let mut demoted = Vec::new();
        for e in bad {
            let before = e.effective_weight();
            let after = (before / 2).max(1);
            if after == before {
                continue;
            }
            tracing::info!(endpoint = %e.url(), from = before, to = after, fail_rate = e.fail_rate(), "Demoting endpoint");
            demoted.push(ChangedEndpoint::capture(e));
            e.set_effective_weight(after);
        }
        demoted
    }

    /// Double the weight of the absorbing endpoints up to the boost cap.
    /// Returns true if any weight changed.
    fn promote(&self, absorbing: &[ChangedEndpoint]) -> bool {
        let mut promoted = false;
        for changed in absorbing {
            let e = &changed.endpoint;
            let cap = e.original_weight().saturating_mul(self.max_boost);
            let after = changed.weight_before.saturating_mul(2).min(cap);
            if after > changed.weight_before {
                tracing::info!(endpoint = %e.url(), from = changed.weight_before, to = after, "Promoting endpoint");
                e.set_effective_weight(after);
                promoted = true;
            }
        }
        promoted
    }
}

fn expired(deadline: Instant, now: Instant) -> bool {
    deadline < now
}

/// Split endpoints into those at or below the average failure rate and those
/// significantly above it.
fn split_endpoints(endpoints: &[Arc<Endpoint>], avg: f64) -> (Vec<Arc<Endpoint>>, Vec<Arc<Endpoint>>) {
    endpoints
        .iter()
        .cloned()
        .partition(|e| !greater(e.fail_rate(), avg))
}

fn avg_fail_rate(endpoints: &[Arc<Endpoint>]) -> f64 {
    let total: f64 = endpoints.iter().map(|e| e.fail_rate()).sum();
    total / endpoints.len() as f64
}

/// Compare two failure rates ignoring differences below one percentage point.
pub fn greater(a: f64, b: f64) -> bool {
    (a * 100.0).floor() > (b * 100.0).floor()
}

/// Next weight on the way from `current` back to `target`.
///
/// A distance of two or more is covered in one step; a distance of one
/// snaps to the target.
pub fn adjust(target: u32, current: u32) -> u32 {
    let diff = i64::from(target) - i64::from(current);
    let next = if (diff / 2).abs() > 0 {
        i64::from(current) + diff
    } else {
        i64::from(target)
    };
    u32::try_from(next.max(1)).unwrap_or(target)
}
