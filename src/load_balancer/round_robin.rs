//! Weighted round-robin selection.
//!
//! Each endpoint is served `effective_weight` times in a row before the
//! cursor moves to the next one, so equal weights degrade to plain round
//! robin. The cursor remembers the registry version it was built for and
//! starts over from the first endpoint whenever membership changes.

use std::sync::Arc;

use crate::error::{LbError, LbResult};
use crate::load_balancer::endpoint::Endpoint;
use crate::load_balancer::registry::Registry;

/// Selection state for one registry.
#[derive(Debug, Default)]
pub struct Cursor {
    /// Position of the last served endpoint; `None` right after a reset.
    index: Option<usize>,
    /// Serves left for the endpoint at `index`.
    remaining: u32,
    /// Registry version this cursor is valid for.
    version: u64,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the position; the next call starts from the first endpoint.
    pub fn reset(&mut self) {
        self.index = None;
        self.remaining = 0;
    }

    /// Pick the next endpoint.
    pub fn next(&mut self, registry: &Registry) -> LbResult<Arc<Endpoint>> {
        let endpoints = registry.list();
        if endpoints.is_empty() {
            return Err(LbError::NoEndpoints);
        }

        if self.version != registry.version() {
            self.reset();
            self.version = registry.version();
        }

        let index = match self.index {
            Some(i) if self.remaining > 0 => i,
            Some(i) => Self::advance(endpoints, (i + 1) % endpoints.len()),
            None => Self::advance(endpoints, 0),
        };

        let weight = endpoints[index].effective_weight();
        if self.index == Some(index) && self.remaining > 0 {
            // The controller may have lowered the weight mid-turn.
            self.remaining = self.remaining.min(weight);
        } else {
            self.remaining = weight;
        }

        self.index = Some(index);
        self.remaining = self.remaining.saturating_sub(1);
        Ok(endpoints[index].clone())
    }

    /// First position at or after `from` (wrapping) with a positive weight.
    fn advance(endpoints: &[Arc<Endpoint>], from: usize) -> usize {
        let len = endpoints.len();
        (0..len)
            .map(|offset| (from + offset) % len)
            .find(|&i| endpoints[i].effective_weight() > 0)
            .unwrap_or(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::testing::{endpoint, StubMeter};
    use std::collections::HashMap;

    fn registry(weights: &[(u16, u32)]) -> Registry {
        let mut registry = Registry::new();
        for (port, weight) in weights {
            let addr = format!("http://localhost:{}", port);
            registry.add(endpoint(&addr, *weight, StubMeter::new(0.0))).unwrap();
        }
        registry
    }

    fn port(e: &Arc<Endpoint>) -> u16 {
        e.url().port().unwrap()
    }

    #[test]
    fn test_no_endpoints() {
        let mut cursor = Cursor::new();
        let registry = Registry::new();
        assert_eq!(cursor.next(&registry).unwrap_err(), LbError::NoEndpoints);
        assert_eq!(cursor.next(&registry).unwrap_err(), LbError::NoEndpoints);
    }

    #[test]
    fn test_single_endpoint() {
        let mut cursor = Cursor::new();
        let registry = registry(&[(5000, 1)]);
        for _ in 0..3 {
            assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
        }
    }

    #[test]
    fn test_round_robin() {
        let mut cursor = Cursor::new();
        let registry = registry(&[(5000, 1), (5001, 1)]);

        let served: Vec<_> = (0..5).map(|_| port(&cursor.next(&registry).unwrap())).collect();
        assert_eq!(served, vec![5000, 5001, 5000, 5001, 5000]);
    }

    #[test]
    fn test_add_resets_cycle() {
        let mut cursor = Cursor::new();
        let mut registry = registry(&[(5000, 1)]);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);

        registry.add(endpoint("http://localhost:5001", 1, StubMeter::new(0.0))).unwrap();

        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5001);
    }

    #[test]
    fn test_remove_resets_cycle() {
        let mut cursor = Cursor::new();
        let mut registry = registry(&[(5000, 1), (5001, 1)]);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);

        registry.remove(&"http://localhost:5001".parse().unwrap()).unwrap();
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
    }

    #[test]
    fn test_remove_multiple_endpoints() {
        let mut cursor = Cursor::new();
        let mut registry = registry(&[(5000, 1), (5001, 1), (5002, 1)]);
        cursor.next(&registry).unwrap();
        cursor.next(&registry).unwrap();
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5002);

        registry.remove(&"http://localhost:5000".parse().unwrap()).unwrap();
        registry.remove(&"http://localhost:5001".parse().unwrap()).unwrap();
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5002);
    }

    #[test]
    fn test_remove_restarts_from_first_survivor() {
        let mut cursor = Cursor::new();
        let mut registry = registry(&[(5000, 1), (5001, 1), (5002, 1)]);
        cursor.next(&registry).unwrap();
        cursor.next(&registry).unwrap();

        registry.remove(&"http://localhost:5000".parse().unwrap()).unwrap();
        let served: Vec<_> = (0..4).map(|_| port(&cursor.next(&registry).unwrap())).collect();
        assert_eq!(served, vec![5001, 5002, 5001, 5002]);
    }

    #[test]
    fn test_equal_weights_are_fair() {
        let mut cursor = Cursor::new();
        let registry = registry(&[(5000, 2), (5001, 2), (5002, 2)]);

        let mut counts: HashMap<u16, usize> = HashMap::new();
        for _ in 0..301 {
            *counts.entry(port(&cursor.next(&registry).unwrap())).or_default() += 1;
        }
        for count in counts.values() {
            assert!((100..=101).contains(count), "unfair count {}", count);
        }
    }

    #[test]
    fn test_weighted_distribution() {
        let mut cursor = Cursor::new();
        let registry = registry(&[(5000, 3), (5001, 1)]);

        let served: Vec<_> = (0..8).map(|_| port(&cursor.next(&registry).unwrap())).collect();
        assert_eq!(served, vec![5000, 5000, 5000, 5001, 5000, 5000, 5000, 5001]);
    }

    #[test]
    fn test_lowered_weight_cuts_current_turn() {
        let mut cursor = Cursor::new();
        let registry = registry(&[(5000, 4), (5001, 1)]);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);

        // 3 serves left for 5000; demote it to 2.
        registry.list()[0].set_effective_weight(2);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5001);
        assert_eq!(port(&cursor.next(&registry).unwrap()), 5000);
    }
}
