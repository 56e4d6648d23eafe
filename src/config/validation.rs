//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (weights, backoff, meter geometry)
//! - Detect duplicate or unparseable endpoint addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{MapperConfig, ProxyConfig};
use crate::load_balancer::fsm::MIN_BACKOFF;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid bind address {field} = {value:?}")]
    BindAddress { field: &'static str, value: String },

    #[error("backend {address:?} is not a valid URL: {reason}")]
    BackendUrl { address: String, reason: String },

    #[error("backend {0:?} is listed more than once")]
    DuplicateBackend(String),

    #[error("backend {0:?} must have a weight of at least 1")]
    ZeroWeight(String),

    #[error("balancer.backoff_secs must be at least 1")]
    BackoffTooShort,

    #[error("balancer.tick_interval_ms must be greater than 0")]
    ZeroTickInterval,

    #[error("balancer.max_boost must be at least 1")]
    ZeroMaxBoost,

    #[error("meter needs a non-empty window split into at least one bucket")]
    InvalidMeter,

    #[error("rate_limit.mapper header {0:?} is not a valid header name")]
    InvalidHeader(String),

    #[error("rate_limit requests_per_second and burst_size must be greater than 0")]
    ZeroRateLimit,
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_bind(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_bind(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_bind(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        match backend.url() {
            Ok(url) => {
                if !seen.insert(url) {
                    errors.push(ValidationError::DuplicateBackend(backend.address.clone()));
                }
            }
            Err(e) => errors.push(ValidationError::BackendUrl {
                address: backend.address.clone(),
                reason: e.to_string(),
            }),
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight(backend.address.clone()));
        }
    }

    if config.balancer.backoff() < MIN_BACKOFF {
        errors.push(ValidationError::BackoffTooShort);
    }
    if config.balancer.tick_interval_ms == 0 {
        errors.push(ValidationError::ZeroTickInterval);
    }
    if config.balancer.max_boost == 0 {
        errors.push(ValidationError::ZeroMaxBoost);
    }

    let meter = &config.meter;
    if meter.buckets == 0 || meter.window_secs == 0 || u32::try_from(meter.buckets).is_err() {
        errors.push(ValidationError::InvalidMeter);
    }

    if config.rate_limit.enabled {
        if let MapperConfig::RequestHeader { header } = &config.rate_limit.mapper {
            if axum::http::HeaderName::try_from(header.as_str()).is_err() {
                errors.push(ValidationError::InvalidHeader(header.clone()));
            }
        }
        if config.rate_limit.requests_per_second == 0 || config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::ZeroRateLimit);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_bind(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;

    fn backend(address: &str, weight: u32) -> BackendConfig {
        BackendConfig {
            address: address.to_string(),
            weight,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.backends = vec![
            backend("http://10.0.0.1:80", 1),
            backend("http://10.0.0.1:80", 2),
            backend("not a url", 0),
        ];
        config.balancer.backoff_secs = 0;
        config.balancer.tick_interval_ms = 0;
        config.rate_limit.enabled = true;
        config.rate_limit.mapper = MapperConfig::RequestHeader {
            header: "bad header".into(),
        };

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateBackend("http://10.0.0.1:80".into())));
        assert!(errors.contains(&ValidationError::ZeroWeight("not a url".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::BackendUrl { .. })));
        assert!(errors.contains(&ValidationError::BackoffTooShort));
        assert!(errors.contains(&ValidationError::ZeroTickInterval));
        assert!(errors.contains(&ValidationError::InvalidHeader("bad header".into())));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::BindAddress {
                field: "listener.bind_address",
                value: "localhost".into(),
            }]
        );
    }
}
