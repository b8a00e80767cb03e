//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (headers, host)
//!     → identity.rs (explicit revision headers, else cluster-local host)
//!     → Return: RevisionId or no match
//! ```
//!
//! # Design Decisions
//! - Identification is a pure function of request metadata
//! - Deterministic: same input always identifies the same revision

pub mod identity;

pub use identity::{identify, parse_cluster_host, REVISION_NAMESPACE_HEADER, REVISION_NAME_HEADER};
