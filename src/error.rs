//! Request-level errors.

use thiserror::Error;

use crate::metadata::{MetadataError, RevisionId};

/// Errors that end a request attempt.
#[derive(Debug, Error)]
pub enum ActivatorError {
    /// Neither identification headers nor a cluster-local host were present.
    #[error("unable to identify the requested revision")]
    UnknownRevision,

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Racing writers kept replacing the sticky revision binding.
    #[error("sticky revision for session {session:?} did not settle after {attempts} attempts")]
    StickyRetriesExhausted { session: String, attempts: u32 },

    /// No backend had capacity within the requeue budget.
    #[error("no backend available for revision {0}")]
    NoCapacity(RevisionId),

    /// The revision has no target set.
    #[error("revision {0} has no backends")]
    NoBackends(RevisionId),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ActivatorError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ActivatorError::UnknownRevision => true,
            ActivatorError::Metadata(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ActivatorError::UnknownRevision.is_not_found());
        assert!(ActivatorError::Metadata(MetadataError::NotFound {
            kind: "revision",
            namespace: "default".into(),
            name: "hello".into(),
        })
        .is_not_found());
        assert!(!ActivatorError::Metadata(MetadataError::Unavailable("informer".into())).is_not_found());
        assert!(!ActivatorError::NoCapacity(RevisionId::new("default", "hello")).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = ActivatorError::StickyRetriesExhausted {
            session: "abc".into(),
            attempts: 8,
        };
        assert_eq!(
            err.to_string(),
            "sticky revision for session \"abc\" did not settle after 8 attempts"
        );
    }
}
