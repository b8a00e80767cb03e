//! Proxy handler.
//!
//! Selects a backend of the resolved revision, requeueing while none has
//! capacity, and forwards the request to it. The selection is held by the
//! response body and released when the body ends, fails or is dropped.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Extension, Request, State};
use axum::http::uri::{Authority, Scheme};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};

use super::context::RevisionContext;
use super::request::RequestIdExt;
use super::server::AppState;
use crate::context::RequestContext;
use crate::error::ActivatorError;
use crate::load_balancer::{Pick, RevisionTargets};
use crate::observability::metrics;
use crate::resilience::backoff::requeue_delay;
use crate::session::{self, SessionKeyConfig};

/// Select a backend, retrying with backoff while every backend is busy.
pub async fn select_with_requeue(
    state: &AppState,
    targets: &RevisionTargets,
    ctx: &RequestContext,
) -> Result<Pick, ActivatorError> {
    if targets.is_empty() {
        return Err(ActivatorError::NoBackends(targets.id().clone()));
    }

    let mut attempt = 1;
    loop {
        if let Some(pick) = targets.select(ctx).await {
            return Ok(pick);
        }

        let Some(delay) = requeue_delay(attempt, &state.requeue, ctx) else {
            tracing::warn!(revision = %targets.id(), attempts = attempt, "No backend capacity, giving up");
            return Err(ActivatorError::NoCapacity(targets.id().clone()));
        };

        tracing::debug!(revision = %targets.id(), attempt, delay = ?delay, "No backend capacity, requeueing");
        metrics::record_requeue(targets.policy_name());
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Upstream response body that owns the backend selection until the last
/// frame has been forwarded.
struct PickedBody {
    inner: Incoming,
    pick: Option<Pick>,
}

impl PickedBody {
    fn new(inner: Incoming, pick: Pick) -> Self {
        let mut body = Self { inner, pick: Some(pick) };
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some(pick) = self.pick.take() {
            pick.release();
        }
    }
}

impl HttpBody for PickedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.finish(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn upstream_uri(original: &Uri, dest: &str) -> Result<Uri, ActivatorError> {
    let mut parts = original.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(
        Authority::try_from(dest).map_err(|e| ActivatorError::Upstream(format!("invalid destination {dest:?}: {e}")))?,
    );
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some("/".parse().map_err(|_| ActivatorError::Upstream("invalid path".into()))?);
    }
    Uri::from_parts(parts).map_err(|e| ActivatorError::Upstream(e.to_string()))
}

/// Main proxy handler.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RevisionContext>,
    request: Request,
) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();
    let request_id = request.headers().request_id().to_string();
    let revision = &context.revision;

    let Some(targets) = state.registry.get(&revision.id) else {
        tracing::warn!(request_id = %request_id, revision = %revision.id, "Revision has no target set");
        metrics::record_request(&method, 503, "none", start_time);
        return ActivatorError::NoBackends(revision.id.clone()).into_response();
    };

    let key_config = SessionKeyConfig::from_annotations(&revision.annotations);
    let key = session::resolve(request.headers(), request.uri(), &key_config);
    let ctx = RequestContext::new()
        .with_deadline(context.deadline)
        .with_session(key);

    let pick = match select_with_requeue(&state, &targets, &ctx).await {
        Ok(pick) => pick,
        Err(e) => {
            metrics::record_request(&method, e.status_code().as_u16(), "none", start_time);
            return e.into_response();
        }
    };
    let dest = pick.dest().to_string();

    tracing::debug!(
        request_id = %request_id,
        revision = %revision.id,
        dest = %dest,
        sticky = pick.is_sticky(),
        policy = targets.policy_name(),
        "Proxying request"
    );

    let (mut parts, body) = request.into_parts();
    parts.uri = match upstream_uri(&parts.uri, &dest) {
        Ok(uri) => uri,
        Err(e) => {
            pick.release();
            metrics::record_request(&method, 502, &dest, start_time);
            return e.into_response();
        }
    };

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), &dest, start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(PickedBody::new(body, pick)))
        }
        Err(e) => {
            pick.release();
            tracing::error!(request_id = %request_id, dest = %dest, error = %e, "Upstream error");
            metrics::record_request(&method, 502, &dest, start_time);
            ActivatorError::Upstream(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_uri_rewrites_authority() {
        let original: Uri = "/api/items?page=2".parse().unwrap();
        let uri = upstream_uri(&original, "10.0.0.1:8080").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:8080/api/items?page=2");

        let absolute: Uri = "http://hello.default.svc.cluster.local/x".parse().unwrap();
        let uri = upstream_uri(&absolute, "10.0.0.2:80").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.2:80/x");
    }

    #[test]
    fn test_upstream_uri_rejects_bad_destination() {
        let original: Uri = "/".parse().unwrap();
        assert!(upstream_uri(&original, "not a host").is_err());
    }
}
