//! Per-revision target sets.
//!
//! # Responsibilities
//! - Own the backend trackers for every known revision
//! - Pair each target set with the revision's selection policy
//! - Swap in new membership on reload without losing in-flight accounting
//!
//! # Design Decisions
//! - Readers load a snapshot (`arc-swap`) and never block reloads
//! - A tracker survives a reload when its destination and cap are unchanged
//! - A policy survives a reload when its kind and the revision's cap are
//!   unchanged, so round-robin keeps its cursor

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{build_policy, BackendTracker, LbPolicy, Pick};
use crate::config::{PolicyKind, RevisionConfig};
use crate::context::RequestContext;
use crate::metadata::RevisionId;
use crate::session::SessionAffinity;

/// The backends of one revision and the policy that chooses between them.
#[derive(Debug)]
pub struct RevisionTargets {
    id: RevisionId,
    container_concurrency: usize,
    kind: PolicyKind,
    trackers: Vec<Arc<BackendTracker>>,
    policy: Arc<dyn LbPolicy>,
}

impl RevisionTargets {
    pub fn id(&self) -> &RevisionId {
        &self.id
    }

    pub fn trackers(&self) -> &[Arc<BackendTracker>] {
        &self.trackers
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Run the revision's policy over its current trackers.
    pub async fn select(&self, ctx: &RequestContext) -> Option<Pick> {
        self.policy.select(ctx, &self.trackers).await
    }
}

type Snapshot = HashMap<RevisionId, Arc<RevisionTargets>>;

/// Target sets for every configured revision.
#[derive(Debug)]
pub struct TargetRegistry {
    revisions: ArcSwap<Snapshot>,
    affinity: SessionAffinity,
}

impl TargetRegistry {
    pub fn new(kind: PolicyKind, affinity: SessionAffinity, revisions: &[RevisionConfig]) -> Self {
        let registry = Self {
            revisions: ArcSwap::from_pointee(Snapshot::new()),
            affinity,
        };
        registry.update(kind, revisions);
        registry
    }

    pub fn get(&self, id: &RevisionId) -> Option<Arc<RevisionTargets>> {
        self.revisions.load().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.revisions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.load().is_empty()
    }

    /// Replace membership with `revisions`.
    pub fn update(&self, kind: PolicyKind, revisions: &[RevisionConfig]) {
        let previous = self.revisions.load_full();
        let mut next = Snapshot::with_capacity(revisions.len());

        for config in revisions {
            let id = RevisionId::new(&config.namespace, &config.name);
            let prior = previous.get(&id);
            let cc = config.container_concurrency;
            let capacity = (cc > 0).then_some(cc);

            let trackers = config
                .backends
                .iter()
                .map(|dest| {
                    prior
                        .and_then(|p| p.trackers.iter().find(|t| t.dest() == dest))
                        .filter(|t| t.capacity() == capacity)
                        .cloned()
                        .unwrap_or_else(|| Arc::new(BackendTracker::new(dest.as_str(), cc)))
                })
                .collect();

            let policy = match prior {
                Some(p) if p.kind == kind && p.container_concurrency == cc => p.policy.clone(),
                _ => build_policy(kind, cc, self.affinity.clone()),
            };

            tracing::debug!(revision = %id, backends = config.backends.len(), policy = policy.name(), "Registered revision targets");
            next.insert(
                id.clone(),
                Arc::new(RevisionTargets {
                    id,
                    container_concurrency: cc,
                    kind,
                    trackers,
                    policy,
                }),
            );
        }

        for id in previous.keys().filter(|id| !next.contains_key(*id)) {
            tracing::info!(revision = %id, "Revision removed from targets");
        }

        self.revisions.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(name: &str, cc: usize, backends: &[&str]) -> RevisionConfig {
        RevisionConfig {
            namespace: "default".into(),
            name: name.into(),
            service: "hello".into(),
            container_concurrency: cc,
            annotations: Default::default(),
            backends: backends.iter().map(|b| b.to_string()).collect(),
        }
    }

    fn id(name: &str) -> RevisionId {
        RevisionId::new("default", name)
    }

    #[tokio::test]
    async fn test_select_through_registry() {
        let registry = TargetRegistry::new(
            PolicyKind::Auto,
            SessionAffinity::disabled(),
            &[revision("a", 1, &["10.0.0.1", "10.0.0.2"])],
        );

        let targets = registry.get(&id("a")).unwrap();
        assert_eq!(targets.policy_name(), "first_available");
        let ctx = RequestContext::new();
        let first = targets.select(&ctx).await.unwrap();
        let second = targets.select(&ctx).await.unwrap();
        assert_eq!(first.dest(), "10.0.0.1");
        assert_eq!(second.dest(), "10.0.0.2");
        assert!(targets.select(&ctx).await.is_none());
        assert!(registry.get(&id("missing")).is_none());
    }

    #[tokio::test]
    async fn test_update_preserves_surviving_trackers() {
        let registry = TargetRegistry::new(
            PolicyKind::Auto,
            SessionAffinity::disabled(),
            &[revision("a", 2, &["10.0.0.1", "10.0.0.2"])],
        );
        let before = registry.get(&id("a")).unwrap();
        let held = before.select(&RequestContext::new()).await.unwrap();
        assert_eq!(held.dest(), "10.0.0.1");

        registry.update(PolicyKind::Auto, &[revision("a", 2, &["10.0.0.1", "10.0.0.3"])]);

        let after = registry.get(&id("a")).unwrap();
        let dests: Vec<_> = after.trackers().iter().map(|t| t.dest()).collect();
        assert_eq!(dests, ["10.0.0.1", "10.0.0.3"]);
        assert!(Arc::ptr_eq(&before.trackers()[0], &after.trackers()[0]));
        assert_eq!(after.trackers()[0].outstanding(), 1);

        drop(held);
        assert_eq!(after.trackers()[0].outstanding(), 0);
    }

    #[tokio::test]
    async fn test_capacity_change_replaces_trackers_and_policy() {
        let registry = TargetRegistry::new(
            PolicyKind::Auto,
            SessionAffinity::disabled(),
            &[revision("a", 0, &["10.0.0.1"])],
        );
        let before = registry.get(&id("a")).unwrap();
        assert_eq!(before.policy_name(), "power_of_two");

        registry.update(PolicyKind::Auto, &[revision("a", 10, &["10.0.0.1"])]);
        let after = registry.get(&id("a")).unwrap();
        assert_eq!(after.policy_name(), "round_robin");
        assert!(!Arc::ptr_eq(&before.trackers()[0], &after.trackers()[0]));
        assert_eq!(after.trackers()[0].capacity(), Some(10));
    }

    #[test]
    fn test_update_drops_removed_revisions() {
        let registry = TargetRegistry::new(
            PolicyKind::RoundRobin,
            SessionAffinity::disabled(),
            &[revision("a", 0, &["10.0.0.1"]), revision("b", 0, &["10.0.0.2"])],
        );
        assert_eq!(registry.len(), 2);

        registry.update(PolicyKind::RoundRobin, &[revision("b", 0, &["10.0.0.2"])]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id("a")).is_none());
    }
}
