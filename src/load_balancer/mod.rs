//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     → balancer.rs (LoadBalancer::next_endpoint)
//!     → round_robin.rs (weighted cursor over the registry)
//!     → registry.rs (ordered endpoints, versioned membership)
//!     → endpoint.rs (effective weight)
//!
//! Request outcome:
//!     → pool.rs (record success/failure into the endpoint's meter)
//!
//! Control path (driver.rs, fixed cadence):
//!     → balancer.rs (LoadBalancer::tick on a registry snapshot)
//!     → fsm.rs (read failure rates, rewrite effective weights)
//! ```
//!
//! # Design Decisions
//! - The selector never reads failure rates; weights are its only input
//! - The controller never adds or removes endpoints
//! - Effective weight is never below 1: demotion biases traffic, it does
//!   not exclude an endpoint

pub mod balancer;
pub mod driver;
pub mod endpoint;
pub mod fsm;
pub mod pool;
pub mod registry;
pub mod round_robin;

pub use balancer::LoadBalancer;
pub use driver::ControllerDriver;
pub use endpoint::{Endpoint, FailureRate};
pub use fsm::{AdaptiveController, Phase};
pub use pool::EndpointPool;
