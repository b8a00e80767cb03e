//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the context middleware and proxy handler
//! - Wire up middleware (tracing, timeout, in-flight limit, request ID)
//! - Apply configuration reloads to metadata and target sets
//! - Serve until shutdown, draining in-flight requests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::routing::any;
use axum::Router;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::context::{revision_context, ContextResolver};
use super::proxy::proxy_handler;
use super::request::{propagate_request_id_layer, set_request_id_layer};
use crate::config::{ActivatorConfig, RequeueConfig};
use crate::load_balancer::TargetRegistry;
use crate::metadata::StaticMetadata;
use crate::session::{SessionAffinity, StickyRevisionResolver};
use crate::store::AffinityStore;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ContextResolver>,
    pub registry: Arc<TargetRegistry>,
    pub client: Client<HttpConnector, Body>,
    pub requeue: RequeueConfig,
}

/// HTTP server for the activator.
pub struct HttpServer {
    router: Router,
    config: ActivatorConfig,
    metadata: Arc<StaticMetadata>,
    registry: Arc<TargetRegistry>,
}

impl HttpServer {
    /// Create a new HTTP server around an already opened affinity store.
    pub fn new(config: ActivatorConfig, store: Arc<dyn AffinityStore>) -> Self {
        let operation_timeout = Duration::from_millis(config.store.operation_timeout_ms);

        let metadata = Arc::new(StaticMetadata::new(&config.services, &config.revisions));
        let affinity = SessionAffinity::new(store.clone(), operation_timeout);
        let registry = Arc::new(TargetRegistry::new(
            config.load_balancing.policy,
            affinity,
            &config.revisions,
        ));

        let sticky = StickyRevisionResolver::new(
            Some(store),
            metadata.clone(),
            config.sticky.max_cas_retries,
            operation_timeout,
        );
        let context = Arc::new(ContextResolver {
            metadata: metadata.clone(),
            sticky,
            cluster_domain: config.cluster.domain.clone(),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        });

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            context,
            registry: registry.clone(),
            client,
            requeue: config.requeue.clone(),
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            metadata,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ActivatorConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), revision_context))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Swap in reloaded revisions and services. Listener, store and timeout
    /// settings only change on restart.
    pub fn apply_reload(metadata: &StaticMetadata, registry: &TargetRegistry, config: &ActivatorConfig) {
        metadata.update(&config.services, &config.revisions);
        registry.update(config.load_balancing.policy, &config.revisions);
        tracing::info!(
            services = config.services.len(),
            revisions = config.revisions.len(),
            "Configuration reloaded"
        );
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ActivatorConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            revisions = self.registry.len(),
            policy = ?self.config.load_balancing.policy,
            "HTTP server starting"
        );

        let metadata = self.metadata.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                Self::apply_reload(&metadata, &registry, &config);
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ActivatorConfig {
        &self.config
    }
}
