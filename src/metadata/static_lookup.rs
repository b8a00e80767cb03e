//! Configuration-backed metadata lookup.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::{MetadataError, MetadataLookup, Revision, RevisionId, Service};
use crate::config::{RevisionConfig, ServiceConfig};

#[derive(Debug, Default)]
struct Snapshot {
    revisions: HashMap<RevisionId, Revision>,
    services: HashMap<(String, String), Service>,
}

/// Serves revision and service lookups from the `[[revisions]]` and
/// `[[services]]` tables. Reloads swap the whole snapshot atomically.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    snapshot: ArcSwap<Snapshot>,
}

impl StaticMetadata {
    pub fn new(services: &[ServiceConfig], revisions: &[RevisionConfig]) -> Self {
        let metadata = Self::default();
        metadata.update(services, revisions);
        metadata
    }

    /// Replace the served objects.
    pub fn update(&self, services: &[ServiceConfig], revisions: &[RevisionConfig]) {
        let services = services
            .iter()
            .map(|s| {
                (
                    (s.namespace.clone(), s.name.clone()),
                    Service {
                        namespace: s.namespace.clone(),
                        name: s.name.clone(),
                        annotations: s.annotations.clone(),
                    },
                )
            })
            .collect();

        let revisions = revisions
            .iter()
            .map(|r| {
                let id = RevisionId::new(&r.namespace, &r.name);
                let revision = Revision {
                    id: id.clone(),
                    service: r.service.clone(),
                    container_concurrency: r.container_concurrency,
                    annotations: r.annotations.clone(),
                };
                (id, revision)
            })
            .collect();

        self.snapshot.store(Arc::new(Snapshot { revisions, services }));
    }
}

#[async_trait]
impl MetadataLookup for StaticMetadata {
    async fn lookup_revision(&self, namespace: &str, name: &str) -> Result<Revision, MetadataError> {
        self.snapshot
            .load()
            .revisions
            .get(&RevisionId::new(namespace, name))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                kind: "revision",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn lookup_service(&self, namespace: &str, name: &str) -> Result<Service, MetadataError> {
        self.snapshot
            .load()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                kind: "service",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
