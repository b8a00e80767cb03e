//! Sticky-session activator library.
//!
//! Routes requests for a workload revision to one of its live backends,
//! enforcing per-backend concurrency and binding client sessions to a
//! backend or revision through a shared affinity store.

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod metadata;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod session;
pub mod store;

pub use config::ActivatorConfig;
pub use error::ActivatorError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
