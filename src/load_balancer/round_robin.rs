//! Round-robin load balancing strategy.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{settle, sticky_pick, BackendTracker, LbPolicy, Pick};
use crate::context::RequestContext;
use crate::observability::metrics;
use crate::session::SessionAffinity;

/// Round-robin selector.
/// Keeps one shared cursor and rotates through backends that have capacity.
/// The cursor lock covers the scan only, never a store call.
#[derive(Debug)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
    affinity: SessionAffinity,
}

impl RoundRobin {
    pub fn new(affinity: SessionAffinity) -> Self {
        Self::starting_at(affinity, 0)
    }

    /// Start the rotation at `cursor` instead of the first backend.
    pub fn starting_at(affinity: SessionAffinity, cursor: usize) -> Self {
        Self {
            cursor: Mutex::new(cursor),
            affinity,
        }
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LbPolicy for RoundRobin {
    async fn select(&self, ctx: &RequestContext, targets: &[Arc<BackendTracker>]) -> Option<Pick> {
        if let Some(pick) = sticky_pick(self.name(), &self.affinity, ctx, targets).await {
            return Some(pick);
        }

        let (previous, reserved) = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *cursor;
            let len = targets.len();
            // The target set may have shrunk since the last call.
            if *cursor >= len {
                *cursor = 0;
            }
            let start = *cursor;

            let found = (0..len)
                .map(|i| (start + i) % len)
                .find_map(|p| targets[p].reserve(ctx).map(|release| (p, release)));
            if let Some((p, _)) = &found {
                *cursor = p + 1;
            }
            (previous, found)
        };

        match reserved {
            Some((p, release)) => {
                let pick = settle(self.name(), &self.affinity, ctx, targets[p].clone(), release).await;
                if pick.is_none() {
                    // Lost the binding race: undo the advance unless another
                    // selection has moved the cursor since.
                    let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
                    if *cursor == p + 1 {
                        *cursor = previous;
                    }
                }
                pick
            }
            None => {
                metrics::record_selection(self.name(), "no_capacity");
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
