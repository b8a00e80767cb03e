//! First-available selection: the first tracker, in order, that can take the
//! request right now. Suited to small per-backend concurrency caps.

use std::sync::Arc;

use async_trait::async_trait;

use super::{settle, sticky_pick, BackendTracker, LbPolicy, Pick};
use crate::context::RequestContext;
use crate::observability::metrics;
use crate::session::SessionAffinity;

#[derive(Debug)]
pub struct FirstAvailable {
    affinity: SessionAffinity,
}

impl FirstAvailable {
    pub fn new(affinity: SessionAffinity) -> Self {
        Self { affinity }
    }
}

#[async_trait]
impl LbPolicy for FirstAvailable {
    async fn select(&self, ctx: &RequestContext, targets: &[Arc<BackendTracker>]) -> Option<Pick> {
        if let Some(pick) = sticky_pick(self.name(), &self.affinity, ctx, targets).await {
            return Some(pick);
        }

        let reserved = targets
            .iter()
            .find_map(|t| t.reserve(ctx).map(|release| (t.clone(), release)));

        match reserved {
            Some((tracker, release)) => settle(self.name(), &self.affinity, ctx, tracker, release).await,
            None => {
                metrics::record_selection(self.name(), "no_capacity");
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "first_available"
    }
}
