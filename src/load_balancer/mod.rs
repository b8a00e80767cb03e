//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Revision identified → registry.rs (target set snapshot + policy)
//!     → session/affinity.rs (session already bound? return it)
//!     → Apply load balancing algorithm:
//!         - random.rs (uniform pick, no bookkeeping)
//!         - power_of_two.rs (lower weight of two draws)
//!         - first_available.rs (first tracker with capacity)
//!         - round_robin.rs (shared cursor, first with capacity)
//!     → session/affinity.rs (bind new session, or back off on conflict)
//!     → Return Pick (tracker + release) or None ("no target, requeue")
//! ```
//!
//! # Design Decisions
//! - Policies never create or retire trackers; the registry owns them
//! - A sticky hit bypasses capacity and weight bookkeeping entirely
//! - Losing a binding race releases what was claimed and reports no target

pub mod first_available;
pub mod power_of_two;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod tracker;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PolicyKind;
use crate::context::RequestContext;
use crate::observability::metrics;
use crate::session::SessionAffinity;

pub use first_available::FirstAvailable;
pub use power_of_two::PowerOfTwoChoices;
pub use random::RandomChoice;
pub use registry::{RevisionTargets, TargetRegistry};
pub use round_robin::RoundRobin;
pub use tracker::{BackendTracker, Release};

/// Highest per-backend concurrency served by first-available under
/// [`PolicyKind::Auto`].
pub const FIRST_AVAILABLE_MAX_CONCURRENCY: usize = 3;

/// A selected backend and the handle that returns what selecting it claimed.
pub struct Pick {
    tracker: Arc<BackendTracker>,
    release: Release,
    sticky: bool,
}

impl Pick {
    pub fn new(tracker: Arc<BackendTracker>, release: Release) -> Self {
        Self {
            tracker,
            release,
            sticky: false,
        }
    }

    /// A pick served from an existing session binding.
    pub fn sticky(tracker: Arc<BackendTracker>) -> Self {
        Self {
            tracker,
            release: Release::noop(),
            sticky: true,
        }
    }

    pub fn tracker(&self) -> &Arc<BackendTracker> {
        &self.tracker
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Give back the reservation or weight taken for this pick.
    pub fn release(self) {
        self.release.release();
    }
}

impl Deref for Pick {
    type Target = BackendTracker;

    fn deref(&self) -> &BackendTracker {
        &self.tracker
    }
}

impl fmt::Debug for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pick")
            .field("dest", &self.tracker.dest())
            .field("release", &self.release)
            .field("sticky", &self.sticky)
            .finish()
    }
}

/// A backend selection algorithm.
///
/// `targets` is an immutable snapshot for the duration of the call; the
/// trackers inside may be mutated concurrently. `None` means no backend can
/// take the request right now and the caller should requeue or reject.
#[async_trait]
pub trait LbPolicy: Send + Sync + fmt::Debug {
    async fn select(&self, ctx: &RequestContext, targets: &[Arc<BackendTracker>]) -> Option<Pick>;

    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;
}

/// Construct the policy for a revision.
pub fn build_policy(
    kind: PolicyKind,
    container_concurrency: usize,
    affinity: SessionAffinity,
) -> Arc<dyn LbPolicy> {
    let kind = match kind {
        PolicyKind::Auto => match container_concurrency {
            0 => PolicyKind::PowerOfTwo,
            1..=FIRST_AVAILABLE_MAX_CONCURRENCY => PolicyKind::FirstAvailable,
            _ => PolicyKind::RoundRobin,
        },
        explicit => explicit,
    };

    match kind {
        PolicyKind::Random => Arc::new(RandomChoice::new()),
        PolicyKind::PowerOfTwo | PolicyKind::Auto => Arc::new(PowerOfTwoChoices::new(affinity)),
        PolicyKind::FirstAvailable => Arc::new(FirstAvailable::new(affinity)),
        PolicyKind::RoundRobin => Arc::new(RoundRobin::new(affinity)),
    }
}

/// Serve the request from its session binding, if it has a live one.
pub(crate) async fn sticky_pick(
    policy: &'static str,
    affinity: &SessionAffinity,
    ctx: &RequestContext,
    targets: &[Arc<BackendTracker>],
) -> Option<Pick> {
    let tracker = affinity.lookup(ctx, targets).await?;
    metrics::record_selection(policy, "sticky");
    Some(Pick::sticky(tracker))
}

/// Bind the session (if any) to a freshly selected candidate. On a lost
/// race the claimed release is dropped and no target is reported.
pub(crate) async fn settle(
    policy: &'static str,
    affinity: &SessionAffinity,
    ctx: &RequestContext,
    tracker: Arc<BackendTracker>,
    release: Release,
) -> Option<Pick> {
    if !affinity.bind(ctx, &tracker).await.accepts() {
        release.release();
        metrics::record_selection(policy, "session_conflict");
        return None;
    }
    metrics::record_selection(policy, "picked");
    Some(Pick::new(tracker, release))
}
