//! Error responses.
//!
//! # Design Decisions
//! - Unknown revisions and missing metadata are 404
//! - Capacity exhaustion and unsettled sticky bindings are 503 so the
//!   caller may retry the whole request
//! - Upstream failures are 502; anything else is 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::ActivatorError;

impl ActivatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            ActivatorError::StickyRetriesExhausted { .. }
            | ActivatorError::NoCapacity(_)
            | ActivatorError::NoBackends(_) => StatusCode::SERVICE_UNAVAILABLE,
            ActivatorError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ActivatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, format!("Error getting active endpoint: {self}")).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataError, RevisionId};

    #[test]
    fn test_status_mapping() {
        let id = RevisionId::new("default", "hello");
        assert_eq!(ActivatorError::UnknownRevision.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ActivatorError::Metadata(MetadataError::NotFound {
                kind: "service",
                namespace: "default".into(),
                name: "hello".into(),
            })
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ActivatorError::Metadata(MetadataError::Unavailable("lister".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ActivatorError::NoCapacity(id.clone()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ActivatorError::NoBackends(id).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ActivatorError::StickyRetriesExhausted {
                session: "abc".into(),
                attempts: 3
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ActivatorError::Upstream("reset".into()).status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_into_response_status() {
        let response = ActivatorError::UnknownRevision.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
