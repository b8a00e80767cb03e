//! Session stickiness.
//!
//! # Data Flow
//! ```text
//! Request headers + URI
//!     → key.rs (resolve session key from annotations)
//!     → revision.rs (session → revision binding, service annotations)
//!     → affinity.rs (session → backend binding, revision annotations)
//! ```
//!
//! # Design Decisions
//! - Bindings live in the shared affinity store, never in process memory
//! - A missing session key disables stickiness for that request only

pub mod affinity;
pub mod key;
pub mod revision;

pub use affinity::{Binding, SessionAffinity};
pub use key::{
    annotations, resolve, KeySource, SessionKey, SessionKeyConfig, DEACTIVATE_HEADER,
    REVISION_HEADER, SESSION_HEADER,
};
pub use revision::{revision_key, StickyRevisionResolver, REVISION_KEY_PREFIX};
