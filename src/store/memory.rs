//! In-process affinity store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{AffinityStore, CasOutcome, StoreError};

/// Affinity store backed by a concurrent map.
///
/// Bindings are only visible to this process, which is enough for a single
/// activator instance and for tests. Per-key operations are atomic because
/// DashMap holds the shard lock for the duration of an entry operation.
#[derive(Debug, Default)]
pub struct MemoryAffinityStore {
    inner: DashMap<String, String>,
    closed: AtomicBool,
}

impl MemoryAffinityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bindings.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Connection("store closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AffinityStore for MemoryAffinityStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.ensure_open()?;
        self.inner
            .get(key)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.inner.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let removed = self.inner.remove_if(key, |_, v| v == expected);
        Ok(u64::from(removed.is_some()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        desired: &str,
    ) -> Result<CasOutcome, StoreError> {
        self.ensure_open()?;
        let outcome = match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if expected == Some(entry.get().as_str()) {
                    entry.insert(desired.to_string());
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict {
                        current: Some(entry.get().clone()),
                    }
                }
            }
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(desired.to_string());
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict { current: None }
                }
            }
        };
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryAffinityStore::new();
        assert_eq!(store.get("abc").await, Err(StoreError::NotFound));

        store.set("abc", "10.0.0.1:80").await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), "10.0.0.1:80");
    }

    #[tokio::test]
    async fn test_delete_if_equals_only_deletes_matching_value() {
        let store = MemoryAffinityStore::new();
        store.set("abc", "10.0.0.1:80").await.unwrap();

        assert_eq!(store.delete_if_equals("abc", "10.0.0.2:80").await.unwrap(), 0);
        assert_eq!(store.get("abc").await.unwrap(), "10.0.0.1:80");

        assert_eq!(store.delete_if_equals("abc", "10.0.0.1:80").await.unwrap(), 1);
        assert!(store.get("abc").await.unwrap_err().is_not_found());

        assert_eq!(store.delete_if_equals("abc", "10.0.0.1:80").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryAffinityStore::new();

        // Unset key only matches the unset sentinel.
        assert_eq!(
            store.compare_and_swap("k", Some("x"), "a").await.unwrap(),
            CasOutcome::Conflict { current: None }
        );
        assert_eq!(store.compare_and_swap("k", None, "a").await.unwrap(), CasOutcome::Swapped);

        assert_eq!(
            store.compare_and_swap("k", None, "b").await.unwrap(),
            CasOutcome::Conflict {
                current: Some("a".into())
            }
        );
        assert_eq!(store.compare_and_swap("k", Some("a"), "b").await.unwrap(), CasOutcome::Swapped);
        assert_eq!(store.get("k").await.unwrap(), "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cas_has_single_winner() {
        let store = Arc::new(MemoryAffinityStore::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.compare_and_swap("session", None, &format!("dest-{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() == CasOutcome::Swapped {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryAffinityStore::new();
        store.close().await.unwrap();
        assert!(matches!(store.get("k").await, Err(StoreError::Connection(_))));
    }
}
