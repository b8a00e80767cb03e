//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sticky_activator::config::{ActivatorConfig, PolicyKind, RevisionConfig, ServiceConfig};
use sticky_activator::store::{AffinityStore, MemoryAffinityStore};
use sticky_activator::{HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const NAMESPACE: &str = "default";

/// Start a mock backend that answers every request with its own name.
pub async fn start_named_backend(addr: SocketAddr, name: &'static str) {
    start_programmable_backend(addr, move || async move { (200, name.to_string()) }).await;
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Drain the request head before answering.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

pub fn revision(
    name: &str,
    service: &str,
    container_concurrency: usize,
    backends: &[SocketAddr],
) -> RevisionConfig {
    RevisionConfig {
        namespace: NAMESPACE.into(),
        name: name.into(),
        service: service.into(),
        container_concurrency,
        annotations: HashMap::new(),
        backends: backends.iter().map(|a| a.to_string()).collect(),
    }
}

pub fn service(name: &str, annotations: &[(&str, &str)]) -> ServiceConfig {
    ServiceConfig {
        namespace: NAMESPACE.into(),
        name: name.into(),
        annotations: annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Base configuration for an activator listening on `addr`.
pub fn activator_config(addr: SocketAddr, policy: PolicyKind) -> ActivatorConfig {
    let mut config = ActivatorConfig::default();
    config.listener.bind_address = addr.to_string();
    config.load_balancing.policy = policy;
    config.observability.metrics_enabled = false;
    config.requeue.max_attempts = 3;
    config
}

/// Handle to a running activator.
pub struct RunningActivator {
    pub shutdown: Shutdown,
    pub store: Arc<MemoryAffinityStore>,
    pub config_updates: mpsc::UnboundedSender<ActivatorConfig>,
}

/// Start an activator with an in-process affinity store.
pub async fn start_activator(config: ActivatorConfig) -> RunningActivator {
    let addr: SocketAddr = config.listener.bind_address.parse().unwrap();
    let store = Arc::new(MemoryAffinityStore::new());
    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();

    let server = HttpServer::new(config, store.clone() as Arc<dyn AffinityStore>);
    let listener = TcpListener::bind(addr).await.unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    RunningActivator {
        shutdown,
        store,
        config_updates: config_tx,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Send a request for `revision` and return the status and body.
pub async fn send(
    client: &reqwest::Client,
    activator: SocketAddr,
    revision: &str,
    headers: &[(&str, &str)],
) -> (u16, String) {
    let mut request = client
        .get(format!("http://{activator}/"))
        .header("knative-serving-namespace", NAMESPACE)
        .header("knative-serving-revision", revision);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}
