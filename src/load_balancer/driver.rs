//! Periodic controller driver.
//!
//! Ticks the load balancer's weight controller at a fixed cadence until the
//! shutdown signal fires. The cadence only decides how often the controller
//! looks; the controller's own backoff decides when it may change state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::error::LbError;
use crate::load_balancer::balancer::LoadBalancer;

pub struct ControllerDriver {
    balancer: Arc<LoadBalancer>,
    interval: Duration,
}

impl ControllerDriver {
    pub fn new(balancer: Arc<LoadBalancer>, interval: Duration) -> Self {
        Self { balancer, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Weight controller starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Weight controller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn tick(&self) {
        match self.balancer.tick() {
            Ok(phase) => tracing::trace!(phase = %phase, "Controller tick"),
            Err(LbError::NoEndpoints) => tracing::trace!("Controller tick skipped: no endpoints"),
            Err(e) => tracing::warn!(error = %e, "Controller tick failed, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::load_balancer::endpoint::testing::StubMeter;
    use crate::load_balancer::endpoint::Endpoint;
    use crate::load_balancer::fsm::{AdaptiveController, Phase};
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn test_driver_ticks_until_shutdown() {
        let clock = Arc::new(ManualClock::new());
        let controller = AdaptiveController::with_clock(clock, Duration::from_secs(10)).unwrap();
        let lb = Arc::new(LoadBalancer::new(controller));
        for (port, rate) in [(5000, 0.4), (5001, 0.0)] {
            let url = format!("http://localhost:{}", port).parse().unwrap();
            lb.add_endpoint(Endpoint::new(url, 8, StubMeter::new(rate)).unwrap()).unwrap();
        }

        let shutdown = Shutdown::new();
        let driver = ControllerDriver::new(lb.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(driver.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lb.phase(), Phase::Probing);
        assert_eq!(lb.endpoints()[0].effective_weight(), 4);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver did not stop")
            .unwrap();
    }
}
