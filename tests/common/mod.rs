//! Shared test fixtures: spawn a real axum app on loopback and return its
//! bound address, for both fake upstreams and the gateway under test.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use mcpx_gateway::prelude::*;

pub async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Builds a gateway `AppState` over `config` with a fresh pool/router/metrics
/// and a `secret://local_token` seeded into `secrets`, then spawns it.
pub async fn spawn_gateway(config: ConfigSnapshot, secrets: MemorySecretStore) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let metrics = Arc::new(GatewayMetrics::new());
    let pool = Arc::new(StdioPool::new(metrics.clone()));
    let router = Arc::new(UpstreamRouter::new(pool.clone(), 5_000));

    let state = AppState {
        config: Arc::new(StaticConfigSource::new(config)),
        secrets: Arc::new(secrets),
        router,
        pool,
        metrics,
        local_host: addr.to_string(),
        server_version: "test".to_string(),
    };
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn local_token_secrets() -> MemorySecretStore {
    MemorySecretStore::new().with_secret("local_token", "test-local-token")
}

pub const LOCAL_TOKEN_REF: &str = "secret://local_token";
