//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → mapper.rs (classify request into a quota token: client ip, host or header)
//!     → rate_limit.rs (token bucket per token, consume `amount`)
//!     → Pass to proxy handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a request the mapper cannot classify is rejected
//! - No trust in client input

pub mod mapper;
pub mod rate_limit;

pub use mapper::{RequestMapper, Token};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
