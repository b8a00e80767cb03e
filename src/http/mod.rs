//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID)
//!     → context.rs (identify revision, sticky revision, session header)
//!     → proxy.rs (select backend with requeue, forward)
//!     → response.rs (error → status mapping)
//!     → Send to client
//! ```

pub mod context;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use context::{ContextResolver, RevisionContext};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
