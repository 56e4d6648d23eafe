//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Proxied request completes
//!     → passive.rs (classify outcome, record into the endpoint's RollingMeter)
//!     → RollingMeter::rate() read by the weight controller on each tick
//! ```
//!
//! # Design Decisions
//! - Passive only: failure rates come from real traffic
//! - Health is expressed as a ratio, not a Healthy/Unhealthy flag; the
//!   controller turns it into weight
//! - Thread-safe counters for concurrent request tracking

pub mod passive;

pub use passive::RollingMeter;
