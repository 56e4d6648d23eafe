//! Load balancer composition root.
//!
//! # Responsibilities
//! - Own the endpoint registry and the selection cursor
//! - Expose add/remove/next to the proxy and the control plane
//! - Run controller ticks against a snapshot of the registry
//!
//! # Design Decisions
//! - Registry and cursor share one mutex: add/remove are linearizable with
//!   selection and a membership change can never be observed half-applied
//! - Effective weights are atomics on the endpoints, so a tick never holds
//!   the selection lock while it reads meters

use std::sync::{Arc, Mutex};
use url::Url;

use crate::error::{LbError, LbResult};
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::fsm::{AdaptiveController, Phase};
use crate::load_balancer::registry::Registry;
use crate::load_balancer::round_robin::Cursor;
use crate::observability::metrics;

#[derive(Debug, Default)]
struct Pool {
    registry: Registry,
    cursor: Cursor,
}

/// Adaptive weighted round-robin load balancer.
#[derive(Debug)]
pub struct LoadBalancer {
    pool: Mutex<Pool>,
    controller: Mutex<AdaptiveController>,
}

impl LoadBalancer {
    pub fn new(controller: AdaptiveController) -> Self {
        Self {
            pool: Mutex::new(Pool::default()),
            controller: Mutex::new(controller),
        }
    }

    /// Register an endpoint at the end of the rotation.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> LbResult<Arc<Endpoint>> {
        let endpoint = Arc::new(endpoint);
        let mut pool = self.pool.lock().expect("load balancer mutex poisoned");
        pool.registry.add(endpoint.clone())?;
        pool.cursor.reset();
        tracing::info!(
            endpoint = %endpoint.url(),
            weight = endpoint.original_weight(),
            endpoints = pool.registry.len(),
            "Endpoint added"
        );
        Ok(endpoint)
    }

    /// Remove an endpoint from the rotation.
    pub fn remove_endpoint(&self, url: &Url) -> LbResult<Arc<Endpoint>> {
        let mut pool = self.pool.lock().expect("load balancer mutex poisoned");
        let removed = pool.registry.remove(url)?;
        pool.cursor.reset();
        tracing::info!(endpoint = %url, endpoints = pool.registry.len(), "Endpoint removed");
        Ok(removed)
    }

    /// Rebuild the whole membership in one step.
    ///
    /// `build` receives the current endpoints and returns the new ordered
    /// list; it runs under the selection lock, so no add or remove can slip in
    /// between reading and replacing. Returns the previous membership.
    pub fn replace_endpoints<F>(&self, build: F) -> LbResult<Vec<Arc<Endpoint>>>
    where
        F: FnOnce(&[Arc<Endpoint>]) -> LbResult<Vec<Arc<Endpoint>>>,
    {
        let mut pool = self.pool.lock().expect("load balancer mutex poisoned");
        let next = build(pool.registry.list())?;
        let version = pool.registry.version();
        let previous = pool.registry.replace(next)?;
        if pool.registry.version() != version {
            pool.cursor.reset();
            tracing::info!(endpoints = pool.registry.len(), "Endpoint set replaced");
        }
        Ok(previous)
    }

    /// Pick the endpoint for the next request.
    pub fn next_endpoint(&self) -> LbResult<Arc<Endpoint>> {
        let mut pool = self.pool.lock().expect("load balancer mutex poisoned");
        let Pool { registry, cursor } = &mut *pool;
        cursor.next(registry)
    }

    /// Ordered copy of the current endpoints.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.pool
            .lock()
            .expect("load balancer mutex poisoned")
            .registry
            .snapshot()
    }

    pub fn len(&self) -> usize {
        self.pool.lock().expect("load balancer mutex poisoned").registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current controller phase.
    pub fn phase(&self) -> Phase {
        self.controller.lock().expect("controller mutex poisoned").phase()
    }

    /// Run one controller step over the current membership.
    pub fn tick(&self) -> LbResult<Phase> {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(LbError::NoEndpoints);
        }

        let phase = self
            .controller
            .lock()
            .expect("controller mutex poisoned")
            .update_weights(&endpoints)?;

        for e in &endpoints {
            metrics::record_endpoint_state(e.url().as_str(), e.effective_weight(), e.fail_rate());
        }
        Ok(phase)
    }
}
