//! Concurrent first requests for one session must converge on one backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use sticky_activator::context::RequestContext;
use sticky_activator::load_balancer::{
    BackendTracker, FirstAvailable, LbPolicy, PowerOfTwoChoices, RoundRobin,
};
use sticky_activator::session::{KeySource, SessionAffinity, SessionKey};
use sticky_activator::store::{AffinityStore, MemoryAffinityStore};

fn targets(count: usize, capacity: usize) -> Vec<Arc<BackendTracker>> {
    (1..=count)
        .map(|i| Arc::new(BackendTracker::new(format!("10.0.0.{i}:8080"), capacity)))
        .collect()
}

fn ctx(session: &str) -> RequestContext {
    RequestContext::new()
        .with_timeout(Duration::from_secs(5))
        .with_session(Some(SessionKey::new(session, KeySource::SessionHeader)))
}

/// Select until a backend is returned, as the requeue loop would.
async fn select_until_picked(
    policy: &dyn LbPolicy,
    targets: &[Arc<BackendTracker>],
    session: &str,
) -> String {
    let ctx = ctx(session);
    for _ in 0..50 {
        if let Some(pick) = policy.select(&ctx, targets).await {
            let dest = pick.dest().to_string();
            pick.release();
            return dest;
        }
        tokio::task::yield_now().await;
    }
    panic!("session {session} never got a backend");
}

async fn assert_converges(policy: Arc<dyn LbPolicy>, store: Arc<MemoryAffinityStore>, capacity: usize) {
    let targets = Arc::new(targets(4, capacity));

    let handles = (0..16).map(|_| {
        let policy = policy.clone();
        let targets = targets.clone();
        tokio::spawn(async move { select_until_picked(policy.as_ref(), &targets, "shared").await })
    });
    let dests: HashSet<String> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(dests.len(), 1, "{} diverged: {dests:?}", policy.name());
    let bound = store.get("shared").await.unwrap();
    assert!(dests.contains(&bound));

    for tracker in targets.iter() {
        assert_eq!(tracker.outstanding(), 0, "{} leaked capacity", tracker.dest());
    }
}

fn affinity(store: &Arc<MemoryAffinityStore>) -> SessionAffinity {
    SessionAffinity::new(store.clone() as Arc<dyn AffinityStore>, Duration::from_secs(1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_available_converges() {
    let store = Arc::new(MemoryAffinityStore::new());
    let policy = Arc::new(FirstAvailable::new(affinity(&store)));
    assert_converges(policy, store, 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_robin_converges() {
    let store = Arc::new(MemoryAffinityStore::new());
    let policy = Arc::new(RoundRobin::new(affinity(&store)));
    assert_converges(policy, store, 10).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_power_of_two_converges() {
    let store = Arc::new(MemoryAffinityStore::new());
    let policy = Arc::new(PowerOfTwoChoices::new(affinity(&store)));
    assert_converges(policy, store, 0).await;
}

#[tokio::test]
async fn test_distinct_sessions_spread() {
    let store = Arc::new(MemoryAffinityStore::new());
    let policy = RoundRobin::new(affinity(&store));
    let targets = targets(3, 10);

    let mut dests = Vec::new();
    for session in ["a", "b", "c"] {
        dests.push(select_until_picked(&policy, &targets, session).await);
    }
    assert_eq!(dests, ["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080"]);
    assert_eq!(store.len(), 3);
}
