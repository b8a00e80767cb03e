//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the activator.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the activator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ActivatorConfig {
    /// Listener configuration (bind address, in-flight cap).
    pub listener: ListenerConfig,

    /// Affinity store connection settings.
    pub store: StoreConfig,

    /// Backend selection policy.
    pub load_balancing: LoadBalancingConfig,

    /// Handling of "no target available" selections.
    pub requeue: RequeueConfig,

    /// Revision stickiness settings.
    pub sticky: StickyConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Cluster naming.
    pub cluster: ClusterConfig,

    /// Known services.
    pub services: Vec<ServiceConfig>,

    /// Known revisions and their live backends.
    pub revisions: Vec<RevisionConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8012").
    pub bind_address: String,

    /// Maximum in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8012".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Which affinity store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// In-process map. Stickiness is local to this instance.
    #[default]
    Memory,
    /// Shared Redis/Valkey server.
    Redis,
}

/// Affinity store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection URL (redis backend only).
    pub url: String,

    /// Connection pool size (redis backend only).
    pub pool_size: usize,

    /// Optional prefix applied to every key.
    pub namespace: Option<String>,

    /// Upper bound on a single store call in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://redis:6379".to_string(),
            pool_size: 16,
            namespace: None,
            operation_timeout_ms: 500,
        }
    }
}

/// Load balancing policy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Choose by the revision's container concurrency.
    #[default]
    Auto,
    Random,
    PowerOfTwo,
    FirstAvailable,
    RoundRobin,
}

/// Load balancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancingConfig {
    pub policy: PolicyKind,
}

/// Requeue configuration for selections that found no capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// Maximum number of selection attempts per request.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 10,
            max_delay_ms: 500,
        }
    }
}

/// Revision stickiness configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StickyConfig {
    /// Bound on compare-and-swap attempts when establishing a binding.
    pub max_cas_retries: u32,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self { max_cas_retries: 8 }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Cluster naming used to decode cluster-local host names.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub domain: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            domain: "cluster.local".to_string(),
        }
    }
}

/// A service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub namespace: String,
    pub name: String,

    /// Session key configuration for revision stickiness.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// A revision definition together with its currently known backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RevisionConfig {
    pub namespace: String,
    pub name: String,

    /// Owning service name, in the same namespace.
    pub service: String,

    /// Per-backend concurrency cap (0 = unbounded).
    #[serde(default)]
    pub container_concurrency: usize,

    /// Session key configuration for backend stickiness.
    #[serde(default)]
    pub annotations: HashMap<String, String>,

    /// Backend destination addresses (e.g., "10.0.0.1:8080").
    #[serde(default)]
    pub backends: Vec<String>,
}
