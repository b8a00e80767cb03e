//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every affinity store call by the request deadline and the
//!   configured per-operation limit
//! - Fail fast when the deadline has already passed
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use crate::context::RequestContext;
use crate::store::StoreError;

/// Run a store operation within `min(limit, time left on ctx)`.
pub async fn bounded<T, F>(ctx: &RequestContext, limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let budget = ctx.remaining().map_or(limit, |left| left.min(limit));
    if budget.is_zero() {
        return Err(StoreError::Timeout);
    }

    match tokio::time::timeout(budget, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
