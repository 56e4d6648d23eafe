//! Endpoint pool management.
//!
//! # Responsibilities
//! - Build the load balancer and its endpoints from configuration
//! - Attach a rolling failure meter to every endpoint
//! - Reconcile membership with a reloaded backend list

use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::{BackendConfig, MeterConfig, ProxyConfig};
use crate::error::{LbError, LbResult};
use crate::health::RollingMeter;
use crate::load_balancer::balancer::LoadBalancer;
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::fsm::AdaptiveController;

/// Outcome of a membership reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub added: usize,
    pub removed: usize,
}

/// Load balancer plus the settings for the meters of new endpoints.
#[derive(Debug)]
pub struct EndpointPool {
    balancer: Arc<LoadBalancer>,
    meter_config: MeterConfig,
    clock: Arc<dyn Clock>,
}

impl EndpointPool {
    pub fn new(balancer: Arc<LoadBalancer>, meter_config: MeterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            balancer,
            meter_config,
            clock,
        }
    }

    /// Build a pool with every configured backend registered in order.
    pub fn from_config(config: &ProxyConfig) -> LbResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let controller = AdaptiveController::with_clock(clock.clone(), config.balancer.backoff())?
            .with_max_boost(config.balancer.max_boost)?;
        let pool = Self::new(
            Arc::new(LoadBalancer::new(controller)),
            config.meter.clone(),
            clock,
        );

        for backend in &config.backends {
            pool.add(parse_url(&backend.address)?, backend.weight)?;
        }
        Ok(pool)
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Register a new endpoint with a fresh meter.
    pub fn add(&self, url: Url, weight: u32) -> LbResult<Arc<Endpoint>> {
        self.balancer.add_endpoint(self.build(url, weight)?)
    }

    pub fn remove(&self, url: &Url) -> LbResult<Arc<Endpoint>> {
        self.balancer.remove_endpoint(url)
    }

    pub fn next(&self) -> LbResult<Arc<Endpoint>> {
        self.balancer.next_endpoint()
    }

    /// Make membership match `backends` in one step: keep endpoints whose
    /// address and configured weight are unchanged, build fresh ones for the
    /// rest, and order everything as listed.
    pub fn reconcile(&self, backends: &[BackendConfig]) -> LbResult<Reconciled> {
        let wanted = backends
            .iter()
            .map(|b| Ok((parse_url(&b.address)?, b.weight)))
            .collect::<LbResult<Vec<_>>>()?;

        let mut result = Reconciled::default();
        let next_len = wanted.len();
        self.balancer.replace_endpoints(|current| {
            let mut kept: HashMap<&Url, &Arc<Endpoint>> = current.iter().map(|e| (e.url(), e)).collect();
            let mut next = Vec::with_capacity(next_len);
            for (url, weight) in &wanted {
                match kept.remove(url) {
                    Some(e) if e.original_weight() == *weight => next.push(e.clone()),
                    _ => {
                        next.push(Arc::new(self.build(url.clone(), *weight)?));
                        result.added += 1;
                    }
                }
            }
            result.removed = current.len() + result.added - next.len();
            Ok(next)
        })?;

        if result != Reconciled::default() {
            tracing::info!(
                added = result.added,
                removed = result.removed,
                endpoints = next_len,
                "Endpoint set reconciled"
            );
        }
        Ok(result)
    }

    fn build(&self, url: Url, weight: u32) -> LbResult<Endpoint> {
        let meter = Arc::new(RollingMeter::new(
            self.clock.clone(),
            self.meter_config.window(),
            self.meter_config.buckets,
        )?);
        Endpoint::new(url, weight, meter)
    }
}

fn parse_url(address: &str) -> LbResult<Url> {
    Url::parse(address)
        .map_err(|e| LbError::InvalidConfiguration(format!("invalid endpoint address {:?}: {}", address, e)))
}
