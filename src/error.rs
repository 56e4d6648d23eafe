//! Error definitions for the load balancing core.

use thiserror::Error;
use url::Url;

/// Errors surfaced by the registry, the selector and the weight controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LbError {
    /// Selection was requested while no endpoints are registered.
    #[error("no endpoints available")]
    NoEndpoints,

    /// An endpoint with the same address is already registered.
    #[error("endpoint {0} is already registered")]
    DuplicateEndpoint(Url),

    /// No endpoint with the given address is registered.
    #[error("endpoint {0} not found")]
    EndpointNotFound(Url),

    /// The controller or an endpoint was constructed with unusable settings.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for load balancing operations.
pub type LbResult<T> = Result<T, LbError>;
