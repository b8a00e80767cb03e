//! Affinity store subsystem.
//!
//! # Data Flow
//! ```text
//! session/affinity.rs  (key → backend destination)
//! session/revision.rs  ("rev/" + key → namespace/name)
//!     → AffinityStore (get / set / delete-if-equals / compare-and-swap)
//!     → memory.rs (single instance) or valkey.rs (shared Redis/Valkey)
//! ```
//!
//! # Design Decisions
//! - One injected client, opened and closed by the composition root
//! - Not-found is an error variant, never an empty string
//! - Every call may block on the network; callers bound it with a deadline
//! - CAS reports the observed value on conflict so callers need no extra GET

pub mod memory;
pub mod valkey;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};

pub use self::memory::MemoryAffinityStore;
pub use self::valkey::RedisAffinityStore;

/// Errors returned by affinity store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key has no value.
    #[error("key not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation timed out")]
    Timeout,

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched and now holds the desired value.
    Swapped,
    /// The stored value did not match; `current` is what the store held.
    Conflict { current: Option<String> },
}

/// Shared key/value store holding session bindings.
#[async_trait]
pub trait AffinityStore: Send + Sync {
    /// Read a value. Missing keys return [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Unconditionally write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key` only if it currently holds `expected`. Returns the
    /// number of keys deleted (0 or 1).
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<u64, StoreError>;

    /// Atomically replace `expected` with `desired`. `expected = None`
    /// means "only if the key is unset".
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        desired: &str,
    ) -> Result<CasOutcome, StoreError>;

    /// Release connections. Further calls fail.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Open the store selected by configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn AffinityStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process affinity store; stickiness is local to this instance");
            Ok(Arc::new(MemoryAffinityStore::new()))
        }
        StoreBackend::Redis => Ok(Arc::new(RedisAffinityStore::open(config).await?)),
    }
}
