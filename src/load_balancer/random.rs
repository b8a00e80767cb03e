//! Uniform random selection.
//!
//! Approximates what a connection-level service load balancer does. No
//! capacity check and no session awareness; kept as a baseline.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use super::{BackendTracker, LbPolicy, Pick, Release};
use crate::context::RequestContext;
use crate::observability::metrics;

#[derive(Debug, Default)]
pub struct RandomChoice;

impl RandomChoice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LbPolicy for RandomChoice {
    async fn select(&self, _ctx: &RequestContext, targets: &[Arc<BackendTracker>]) -> Option<Pick> {
        if targets.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..targets.len());
        metrics::record_selection(self.name(), "picked");
        Some(Pick::new(targets[idx].clone(), Release::noop()))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
