//! Backend-level session affinity.
//!
//! # Responsibilities
//! - Before selection: return the backend a session is bound to, deleting
//!   bindings that point outside the current target set
//! - After selection: establish the binding for a new session, or report
//!   that another request won the race
//!
//! # Design Decisions
//! - Bindings are keyed by the raw session key, valued by destination
//! - Establishment is a compare-and-swap against "unset", so exactly one
//!   racing request wins and the rest observe its value
//! - Store failures degrade to non-sticky selection

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::load_balancer::tracker::BackendTracker;
use crate::observability::metrics;
use crate::resilience::timeouts::bounded;
use crate::store::{AffinityStore, CasOutcome};

/// Outcome of trying to bind a session to a selected backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// No session on the request, or stickiness is unavailable.
    Unbound,
    /// The session is bound to the selected backend.
    Bound,
    /// The session is bound to a different backend.
    Conflict { current: String },
}

impl Binding {
    /// Whether the selection may proceed with its candidate.
    pub fn accepts(&self) -> bool {
        !matches!(self, Binding::Conflict { .. })
    }
}

/// Session-to-backend binding against the shared affinity store.
#[derive(Clone)]
pub struct SessionAffinity {
    store: Option<Arc<dyn AffinityStore>>,
    operation_timeout: Duration,
}

impl fmt::Debug for SessionAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAffinity")
            .field("enabled", &self.store.is_some())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl SessionAffinity {
    pub fn new(store: Arc<dyn AffinityStore>, operation_timeout: Duration) -> Self {
        Self {
            store: Some(store),
            operation_timeout,
        }
    }

    /// Affinity that never binds; every selection is non-sticky.
    pub fn disabled() -> Self {
        Self {
            store: None,
            operation_timeout: Duration::ZERO,
        }
    }

    /// Find the tracker the request's session is bound to.
    ///
    /// A binding to a destination missing from `targets` is stale: it is
    /// deleted (only if it still holds that destination) and `None` is
    /// returned so normal selection runs.
    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        targets: &[Arc<BackendTracker>],
    ) -> Option<Arc<BackendTracker>> {
        let store = self.store.as_ref()?;
        let session = ctx.session()?.value();

        let dest = match bounded(ctx, self.operation_timeout, store.get(session)).await {
            Ok(dest) => dest,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Session lookup failed, selecting without stickiness");
                metrics::record_store_error("get");
                return None;
            }
        };

        if let Some(tracker) = targets.iter().find(|t| t.dest() == dest) {
            tracing::debug!(session = %session, dest = %dest, "Session bound to backend");
            return Some(tracker.clone());
        }

        tracing::info!(session = %session, dest = %dest, "Deleting stale session binding");
        metrics::record_sticky("backend", "stale");
        match bounded(ctx, self.operation_timeout, store.delete_if_equals(session, &dest)).await {
            Ok(0) => tracing::debug!(session = %session, "Stale binding already replaced"),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Failed to delete stale session binding");
                metrics::record_store_error("delete");
            }
        }
        None
    }

    /// Bind the request's session to `pick` unless it is already bound
    /// elsewhere.
    pub async fn bind(&self, ctx: &RequestContext, pick: &BackendTracker) -> Binding {
        let (Some(store), Some(session)) = (self.store.as_ref(), ctx.session()) else {
            return Binding::Unbound;
        };
        let session = session.value();

        let outcome = bounded(
            ctx,
            self.operation_timeout,
            store.compare_and_swap(session, None, pick.dest()),
        )
        .await;

        match outcome {
            Ok(CasOutcome::Swapped) => {
                tracing::debug!(session = %session, dest = %pick.dest(), "Session bound");
                metrics::record_sticky("backend", "bound");
                Binding::Bound
            }
            Ok(CasOutcome::Conflict { current: Some(current) }) if current == pick.dest() => Binding::Bound,
            Ok(CasOutcome::Conflict { current: Some(current) }) => {
                tracing::debug!(session = %session, dest = %pick.dest(), current = %current, "Session bound by a concurrent request");
                metrics::record_sticky("backend", "conflict");
                Binding::Conflict { current }
            }
            Ok(CasOutcome::Conflict { current: None }) => {
                // Unreachable for an unset expectation; treat as unbound.
                Binding::Unbound
            }
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Failed to bind session, continuing without stickiness");
                metrics::record_store_error("compare_and_swap");
                Binding::Unbound
            }
        }
    }
}
