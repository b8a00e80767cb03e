//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ActivatorConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps metadata and target sets
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    ActivatorConfig, ClusterConfig, ListenerConfig, LoadBalancingConfig, LogFormat,
    ObservabilityConfig, PolicyKind, RequeueConfig, RevisionConfig, ServiceConfig, StickyConfig,
    StoreBackend, StoreConfig, TimeoutConfig,
};
