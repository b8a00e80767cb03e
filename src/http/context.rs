//! Request context enrichment.
//!
//! # Responsibilities
//! - Identify the requested revision and load it with its owning service
//! - Resolve the session key from the service's annotations
//! - Settle the sticky revision for the session
//! - Attach the final revision to the request for the proxy handler
//!
//! # Design Decisions
//! - Keys found through configured rules are recorded as `K-Session` so
//!   backend selection sees the same session
//! - The deadline is fixed here and shared by everything downstream

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::request::RequestIdExt;
use super::server::AppState;
use crate::context::RequestContext;
use crate::error::ActivatorError;
use crate::metadata::{MetadataLookup, Revision};
use crate::routing::identify;
use crate::session::{self, SessionKeyConfig, StickyRevisionResolver, DEACTIVATE_HEADER};

/// The revision a request is routed to, attached as a request extension.
#[derive(Debug, Clone)]
pub struct RevisionContext {
    pub revision: Arc<Revision>,
    pub deadline: Instant,
}

/// Everything the enrichment step needs.
pub struct ContextResolver {
    pub metadata: Arc<dyn MetadataLookup>,
    pub sticky: StickyRevisionResolver,
    pub cluster_domain: String,
    pub request_timeout: Duration,
}

impl ContextResolver {
    /// Resolve the revision for `request`, recording session and deactivate
    /// headers on it along the way.
    pub async fn resolve(&self, request: &mut Request<Body>) -> Result<RevisionContext, ActivatorError> {
        let deadline = Instant::now() + self.request_timeout;

        let id = identify(request.headers(), request.uri(), &self.cluster_domain)
            .ok_or(ActivatorError::UnknownRevision)?;

        let revision = self
            .metadata
            .lookup_revision(&id.namespace, &id.name)
            .await
            .inspect_err(|e| tracing::error!(revision = %id, error = %e, "Error while getting revision"))?;

        let service = self
            .metadata
            .lookup_service(&id.namespace, &revision.service)
            .await
            .inspect_err(|e| tracing::error!(service = %revision.service, error = %e, "Error while getting service"))?;

        let config = SessionKeyConfig::from_annotations(&service.annotations);
        if let Some(value) = &config.deactivate {
            request.headers_mut().append(DEACTIVATE_HEADER, value.clone());
        }

        let key = session::resolve(request.headers(), request.uri(), &config);
        if let Some(key) = &key {
            key.record(request.headers_mut());
        }

        let ctx = RequestContext::new().with_deadline(deadline);
        let revision = self.sticky.resolve(&ctx, key.as_ref(), revision).await?;

        Ok(RevisionContext {
            revision: Arc::new(revision),
            deadline,
        })
    }
}

/// Middleware wrapping [`ContextResolver::resolve`].
pub async fn revision_context(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match state.context.resolve(&mut request).await {
        Ok(context) => {
            tracing::debug!(
                request_id = %request.headers().request_id(),
                revision = %context.revision.id,
                "Request context resolved"
            );
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(request_id = %request.headers().request_id(), error = %e, "Rejecting request");
            e.into_response()
        }
    }
}
