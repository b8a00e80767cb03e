//! Power-of-two-choices selection.
//!
//! Used when backends have no concurrency cap. Two distinct trackers are
//! drawn and the one with the lower weight wins; ties go to the first draw.
//! Weights are read without synchronisation and may be stale, which is
//! acceptable for a relative load signal.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use super::{settle, sticky_pick, BackendTracker, LbPolicy, Pick, Release};
use crate::context::RequestContext;
use crate::session::SessionAffinity;

#[derive(Debug)]
pub struct PowerOfTwoChoices {
    affinity: SessionAffinity,
}

impl PowerOfTwoChoices {
    pub fn new(affinity: SessionAffinity) -> Self {
        Self { affinity }
    }
}

/// Two distinct indices in `0..len`, `len >= 2`. With exactly two
/// candidates there is nothing to draw.
fn draw_pair(len: usize) -> (usize, usize) {
    if len == 2 {
        return (0, 1);
    }
    let mut rng = rand::thread_rng();
    let first = rng.gen_range(0..len);
    let mut second = rng.gen_range(0..len - 1);
    // Shift the upper half past `first` so the draw covers every other index.
    if second >= first {
        second += 1;
    }
    (first, second)
}

/// The lower-weight tracker; `first` on a tie.
fn lighter<'a>(first: &'a Arc<BackendTracker>, second: &'a Arc<BackendTracker>) -> &'a Arc<BackendTracker> {
    if first.weight() > second.weight() {
        second
    } else {
        first
    }
}

#[async_trait]
impl LbPolicy for PowerOfTwoChoices {
    async fn select(&self, ctx: &RequestContext, targets: &[Arc<BackendTracker>]) -> Option<Pick> {
        if let Some(pick) = sticky_pick(self.name(), &self.affinity, ctx, targets).await {
            return Some(pick);
        }

        let pick = match targets.len() {
            0 => return None,
            1 => targets[0].clone(),
            n => {
                let (a, b) = draw_pair(n);
                lighter(&targets[a], &targets[b]).clone()
            }
        };

        let release = Release::weighted(pick.clone());
        settle(self.name(), &self.affinity, ctx, pick, release).await
    }

    fn name(&self) -> &'static str {
        "power_of_two"
    }
}
