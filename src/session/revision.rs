//! Sticky revision resolution.
//!
//! # Flow
//! ```text
//! CAS("rev/" + session, expected = unset, desired = requested revision)
//!     → swapped                      → requested revision is authoritative
//!     → conflict, current = ours     → requested revision is authoritative
//!     → conflict, current resolvable → route to the sticky revision
//!     → conflict, current stale      → CAS again expecting that stale value
//! ```
//!
//! # Design Decisions
//! - Bounded retries; exhaustion fails the request attempt
//! - Malformed stored values and store or lookup failures leave the request
//!   on its original revision without a binding

use std::sync::Arc;
use std::time::Duration;

use crate::context::RequestContext;
use crate::error::ActivatorError;
use crate::metadata::{MetadataLookup, Revision, RevisionId};
use crate::observability::metrics;
use crate::resilience::timeouts::bounded;
use crate::session::SessionKey;
use crate::store::{AffinityStore, CasOutcome};

/// Store key prefix for session → revision bindings.
pub const REVISION_KEY_PREFIX: &str = "rev/";

/// Store key holding the revision binding for `session`.
pub fn revision_key(session: &str) -> String {
    format!("{REVISION_KEY_PREFIX}{session}")
}

/// Finds or establishes the authoritative revision for a session.
pub struct StickyRevisionResolver {
    store: Option<Arc<dyn AffinityStore>>,
    metadata: Arc<dyn MetadataLookup>,
    max_retries: u32,
    operation_timeout: Duration,
}

impl StickyRevisionResolver {
    pub fn new(
        store: Option<Arc<dyn AffinityStore>>,
        metadata: Arc<dyn MetadataLookup>,
        max_retries: u32,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metadata,
            max_retries,
            operation_timeout,
        }
    }

    /// Return the revision `session` should be served by, binding it to
    /// `requested` when the session is new.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        session: Option<&SessionKey>,
        requested: Revision,
    ) -> Result<Revision, ActivatorError> {
        let (Some(store), Some(session)) = (self.store.as_ref(), session) else {
            return Ok(requested);
        };

        let key = revision_key(session.value());
        let desired = requested.id.to_string();
        let mut expected: Option<String> = None;

        for attempt in 1..=self.max_retries {
            let outcome = bounded(
                ctx,
                self.operation_timeout,
                store.compare_and_swap(&key, expected.as_deref(), &desired),
            )
            .await;

            let current = match outcome {
                Ok(CasOutcome::Swapped) => {
                    tracing::debug!(session = %session.value(), revision = %desired, "Session bound to revision");
                    metrics::record_sticky("revision", "bound");
                    return Ok(requested);
                }
                Ok(CasOutcome::Conflict { current: None }) => {
                    // The binding disappeared underneath us; claim it fresh.
                    expected = None;
                    continue;
                }
                Ok(CasOutcome::Conflict {
                    current: Some(current),
                }) => current,
                Err(e) => {
                    tracing::warn!(session = %session.value(), error = %e, "Revision binding unavailable, keeping requested revision");
                    metrics::record_store_error("compare_and_swap");
                    return Ok(requested);
                }
            };

            if current == desired {
                return Ok(requested);
            }

            let sticky_id: RevisionId = match current.parse() {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(session = %session.value(), error = %e, "Ignoring malformed revision binding");
                    metrics::record_sticky("revision", "malformed");
                    return Ok(requested);
                }
            };

            match self
                .metadata
                .lookup_revision(&sticky_id.namespace, &sticky_id.name)
                .await
            {
                Ok(sticky) => {
                    tracing::info!(from = %requested.id, to = %sticky.id, session = %session.value(), "Overriding revision with sticky revision");
                    metrics::record_sticky("revision", "override");
                    return Ok(sticky);
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(session = %session.value(), stale = %current, attempt, "Sticky revision no longer exists, replacing binding");
                    metrics::record_sticky("revision", "stale");
                    expected = Some(current);
                }
                Err(e) => {
                    tracing::warn!(session = %session.value(), sticky = %current, error = %e, "Sticky revision lookup failed, keeping requested revision");
                    return Ok(requested);
                }
            }
        }

        metrics::record_sticky("revision", "exhausted");
        Err(ActivatorError::StickyRetriesExhausted {
            session: session.value().to_string(),
            attempts: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RevisionConfig, ServiceConfig};
    use crate::metadata::StaticMetadata;
    use crate::session::KeySource;
    use crate::store::{MemoryAffinityStore, StoreError};
    use async_trait::async_trait;

    fn metadata(revisions: &[&str]) -> Arc<StaticMetadata> {
        let services = vec![ServiceConfig {
            namespace: "default".into(),
            name: "hello".into(),
            annotations: Default::default(),
        }];
        let revisions: Vec<RevisionConfig> = revisions
            .iter()
            .map(|name| RevisionConfig {
                namespace: "default".into(),
                name: name.to_string(),
                service: "hello".into(),
                container_concurrency: 0,
                annotations: Default::default(),
                backends: Vec::new(),
            })
            .collect();
        Arc::new(StaticMetadata::new(&services, &revisions))
    }

    fn revision(name: &str) -> Revision {
        Revision {
            id: RevisionId::new("default", name),
            service: "hello".into(),
            container_concurrency: 0,
            annotations: Default::default(),
        }
    }

    fn session(value: &str) -> SessionKey {
        SessionKey::new(value, KeySource::ConfiguredHeader)
    }

    fn resolver(store: Arc<dyn AffinityStore>, metadata: Arc<StaticMetadata>) -> StickyRevisionResolver {
        StickyRevisionResolver::new(Some(store), metadata, 4, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_without_session_keeps_requested() {
        let store = Arc::new(MemoryAffinityStore::new());
        let resolver = resolver(store.clone(), metadata(&["a"]));

        let resolved = resolver.resolve(&RequestContext::new(), None, revision("a")).await.unwrap();
        assert_eq!(resolved.id.name, "a");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_first_request_binds_requested_revision() {
        let store = Arc::new(MemoryAffinityStore::new());
        let resolver = resolver(store.clone(), metadata(&["a", "b"]));

        let resolved = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("a"))
            .await
            .unwrap();
        assert_eq!(resolved.id.name, "a");
        assert_eq!(store.get("rev/u1").await.unwrap(), "default/a");
    }

    #[tokio::test]
    async fn test_existing_binding_overrides_requested_revision() {
        let store = Arc::new(MemoryAffinityStore::new());
        store.set("rev/u1", "default/a").await.unwrap();
        let resolver = resolver(store.clone(), metadata(&["a", "b"]));

        let resolved = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("b"))
            .await
            .unwrap();
        assert_eq!(resolved.id.name, "a");
        assert_eq!(store.get("rev/u1").await.unwrap(), "default/a");
    }

    #[tokio::test]
    async fn test_stale_binding_is_replaced() {
        let store = Arc::new(MemoryAffinityStore::new());
        store.set("rev/u1", "default/gone").await.unwrap();
        let resolver = resolver(store.clone(), metadata(&["b"]));

        let resolved = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("b"))
            .await
            .unwrap();
        assert_eq!(resolved.id.name, "b");
        assert_eq!(store.get("rev/u1").await.unwrap(), "default/b");
    }

    #[tokio::test]
    async fn test_malformed_binding_proceeds_unbound() {
        let store = Arc::new(MemoryAffinityStore::new());
        store.set("rev/u1", "garbage").await.unwrap();
        let resolver = resolver(store.clone(), metadata(&["b"]));

        let resolved = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("b"))
            .await
            .unwrap();
        assert_eq!(resolved.id.name, "b");
        assert_eq!(store.get("rev/u1").await.unwrap(), "garbage");
    }

    /// A store whose binding is always replaced by another stale revision
    /// before our swap lands.
    struct ChurningStore {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl AffinityStore for ChurningStore {
        async fn get(&self, _key: &str) -> Result<String, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_if_equals(&self, _key: &str, _expected: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&str>,
            _desired: &str,
        ) -> Result<CasOutcome, StoreError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(CasOutcome::Conflict {
                current: Some(format!("default/gone-{n}")),
            })
        }
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(ChurningStore {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let resolver = resolver(store.clone(), metadata(&["b"]));

        let err = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivatorError::StickyRetriesExhausted { attempts: 4, .. }));
        assert_eq!(store.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_requested() {
        let store = Arc::new(MemoryAffinityStore::new());
        store.close().await.unwrap();
        let resolver = resolver(store, metadata(&["b"]));

        let resolved = resolver
            .resolve(&RequestContext::new(), Some(&session("u1")), revision("b"))
            .await
            .unwrap();
        assert_eq!(resolved.id.name, "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_converge() {
        let store = Arc::new(MemoryAffinityStore::new());
        let resolver = Arc::new(resolver(store.clone(), metadata(&["a", "b"])));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let resolver = resolver.clone();
            let requested = if i % 2 == 0 { "a" } else { "b" };
            tasks.push(tokio::spawn(async move {
                resolver
                    .resolve(&RequestContext::new(), Some(&session("u1")), revision(requested))
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut resolved = Vec::new();
        for task in tasks {
            resolved.push(task.await.unwrap());
        }
        let bound: RevisionId = store.get("rev/u1").await.unwrap().parse().unwrap();
        assert!(resolved.iter().all(|id| *id == bound));
    }
}
