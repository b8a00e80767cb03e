//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Affinity store call:
//!     → timeouts.rs (bound by request deadline and per-operation limit)
//! Selection found no capacity:
//!     → backoff.rs (requeue after jittered exponential delay)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every store call has a deadline
//! - Requeueing never waits past the request deadline

pub mod backoff;
pub mod timeouts;
