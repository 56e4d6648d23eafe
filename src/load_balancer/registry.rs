//! Endpoint registry.
//!
//! # Responsibilities
//! - Keep the live set of endpoints in insertion order
//! - Reject duplicate addresses and removal of unknown ones
//! - Version every structural change so selectors can detect it
//!
//! # Design Decisions
//! - Ordered `Vec` rather than a map: selection walks it by position
//! - Endpoints are shared as `Arc` so the controller can hold a snapshot
//!   while the proxy keeps selecting

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::error::{LbError, LbResult};
use crate::load_balancer::endpoint::Endpoint;

/// Ordered, versioned collection of endpoints.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: Vec<Arc<Endpoint>>,
    version: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint unless its address is already registered.
    pub fn add(&mut self, endpoint: Arc<Endpoint>) -> LbResult<()> {
        if self.position(endpoint.url()).is_some() {
            return Err(LbError::DuplicateEndpoint(endpoint.url().clone()));
        }
        self.endpoints.push(endpoint);
        self.version += 1;
        Ok(())
    }

    /// Remove the endpoint with the given address and return it.
    pub fn remove(&mut self, url: &Url) -> LbResult<Arc<Endpoint>> {
        let index = self
            .position(url)
            .ok_or_else(|| LbError::EndpointNotFound(url.clone()))?;
        let removed = self.endpoints.remove(index);
        self.version += 1;
        Ok(removed)
    }

    /// Swap in a whole new membership in the given order and return the old
    /// one. Bumps the version once, and not at all when nothing changed.
    pub fn replace(&mut self, endpoints: Vec<Arc<Endpoint>>) -> LbResult<Vec<Arc<Endpoint>>> {
        let mut seen = HashSet::with_capacity(endpoints.len());
        for e in &endpoints {
            if !seen.insert(e.url()) {
                return Err(LbError::DuplicateEndpoint(e.url().clone()));
            }
        }

        let unchanged = endpoints.len() == self.endpoints.len()
            && endpoints.iter().zip(&self.endpoints).all(|(a, b)| Arc::ptr_eq(a, b));
        if unchanged {
            return Ok(endpoints);
        }

        self.version += 1;
        Ok(std::mem::replace(&mut self.endpoints, endpoints))
    }

    /// Ordered read-only view.
    pub fn list(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Owned copy of the current membership.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.clone()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Incremented on every membership change.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn position(&self, url: &Url) -> Option<usize> {
        self.endpoints.iter().position(|e| e.url() == url)
    }
}
