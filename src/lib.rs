//! Adaptive Reverse Proxy Library
//!
//! Weighted round-robin endpoint selection with a feedback controller that
//! shifts weight away from endpoints whose failure rate stands out.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::{LbError, LbResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{AdaptiveController, EndpointPool, LoadBalancer, Phase};
