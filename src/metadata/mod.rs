//! Revision and service metadata.
//!
//! # Data Flow
//! ```text
//! routing/identity.rs (namespace, name)
//!     → MetadataLookup::lookup_revision
//!     → MetadataLookup::lookup_service (owner of the revision)
//!     → annotations drive session key resolution
//! ```
//!
//! # Design Decisions
//! - Lookups are an interface; the cluster control plane is not our concern
//! - Not-found and transient failures are distinct error variants
//! - `static_lookup.rs` serves lookups from configuration

pub mod static_lookup;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

pub use static_lookup::StaticMetadata;

/// Separator between namespace and name in a canonical revision identity.
pub const ID_SEPARATOR: char = '/';

/// Namespaced identity of a revision, rendered as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId {
    pub namespace: String,
    pub name: String,
}

impl RevisionId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, ID_SEPARATOR, self.name)
    }
}

/// A stored revision identity that is not a `namespace/name` pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed revision identity {0:?}")]
pub struct ParseRevisionIdError(pub String);

impl FromStr for RevisionId {
    type Err = ParseRevisionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(ID_SEPARATOR) {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ParseRevisionIdError(s.to_string())),
        }
    }
}

/// A routable workload revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    /// Name of the owning service (same namespace).
    pub service: String,
    /// Per-backend concurrency cap. `0` means unbounded.
    pub container_concurrency: usize,
    pub annotations: HashMap<String, String>,
}

/// The service that owns one or more revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub annotations: HashMap<String, String>,
}

/// Errors returned by metadata lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The lookup could not be answered right now.
    #[error("metadata unavailable: {0}")]
    Unavailable(String),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound { .. })
    }
}

/// Source of revision and service objects.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup_revision(&self, namespace: &str, name: &str) -> Result<Revision, MetadataError>;

    async fn lookup_service(&self, namespace: &str, name: &str) -> Result<Service, MetadataError>;
}
