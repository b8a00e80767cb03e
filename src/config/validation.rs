//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (revisions reference existing services)
//! - Validate value ranges (pool sizes, retry bounds, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ActivatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{ActivatorConfig, StoreBackend};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ActivatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.store.backend == StoreBackend::Redis {
        match url::Url::parse(&config.store.url) {
            Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
            Ok(url) => errors.push(ValidationError::new(
                "store.url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("store.url", e.to_string())),
        }
        if config.store.pool_size == 0 {
            errors.push(ValidationError::new("store.pool_size", "must be greater than 0"));
        }
    }
    if config.store.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("store.operation_timeout_ms", "must be greater than 0"));
    }

    if config.requeue.max_attempts == 0 {
        errors.push(ValidationError::new("requeue.max_attempts", "must be at least 1"));
    }
    if config.requeue.base_delay_ms > config.requeue.max_delay_ms {
        errors.push(ValidationError::new(
            "requeue.base_delay_ms",
            "must not exceed requeue.max_delay_ms",
        ));
    }
    if config.sticky.max_cas_retries == 0 {
        errors.push(ValidationError::new("sticky.max_cas_retries", "must be at least 1"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let mut services = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if service.namespace.is_empty() || service.name.is_empty() {
            errors.push(ValidationError::new(
                format!("services[{i}]"),
                "namespace and name are required",
            ));
        }
        if !services.insert((service.namespace.as_str(), service.name.as_str())) {
            errors.push(ValidationError::new(
                format!("services[{i}]"),
                format!("duplicate service {}/{}", service.namespace, service.name),
            ));
        }
    }

    let mut revisions = HashSet::new();
    for (i, revision) in config.revisions.iter().enumerate() {
        let field = format!("revisions[{i}]");
        if revision.namespace.is_empty() || revision.name.is_empty() {
            errors.push(ValidationError::new(&field, "namespace and name are required"));
        }
        if !revisions.insert((revision.namespace.as_str(), revision.name.as_str())) {
            errors.push(ValidationError::new(
                &field,
                format!("duplicate revision {}/{}", revision.namespace, revision.name),
            ));
        }
        if !services.contains(&(revision.namespace.as_str(), revision.service.as_str())) {
            errors.push(ValidationError::new(
                format!("{field}.service"),
                format!("unknown service {}/{}", revision.namespace, revision.service),
            ));
        }

        let mut dests = HashSet::new();
        for dest in &revision.backends {
            if dest.is_empty() {
                errors.push(ValidationError::new(format!("{field}.backends"), "empty destination"));
            } else if !dests.insert(dest.as_str()) {
                errors.push(ValidationError::new(
                    format!("{field}.backends"),
                    format!("duplicate destination {dest}"),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RevisionConfig, ServiceConfig};

    fn service(name: &str) -> ServiceConfig {
        ServiceConfig {
            namespace: "default".into(),
            name: name.into(),
            annotations: Default::default(),
        }
    }

    fn revision(name: &str, service: &str, backends: &[&str]) -> RevisionConfig {
        RevisionConfig {
            namespace: "default".into(),
            name: name.into(),
            service: service.into(),
            container_concurrency: 0,
            annotations: Default::default(),
            backends: backends.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ActivatorConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ActivatorConfig::default();
        config.listener.bind_address.clear();
        config.sticky.max_cas_retries = 0;
        config.services.push(service("hello"));
        config.revisions.push(revision("hello-1", "missing", &["10.0.0.1:80", "10.0.0.1:80"]));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"sticky.max_cas_retries"));
        assert!(fields.contains(&"revisions[0].service"));
        assert!(fields.contains(&"revisions[0].backends"));
    }

    #[test]
    fn test_redis_store_requires_redis_url() {
        let mut config = ActivatorConfig::default();
        config.store.backend = StoreBackend::Redis;
        config.store.url = "http://redis:6379".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "store.url");

        config.store.url = "redis://127.0.0.1:6379".into();
        assert!(validate_config(&config).is_ok());
    }
}
