//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → proxy server, admin server, controller driver, reload loop
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Controller state needs no reconciliation on exit: it is consistent at
//!   every tick boundary

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
