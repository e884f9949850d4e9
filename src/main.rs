//! Bootstrap binary: wires a file-backed `ConfigSource` and an
//! environment-backed `SecretStore` to the gateway core and starts the
//! HTTP front end on loopback (§1 "Crate framing", §6).
//!
//! This is not the daemon-supervision CLI described as out of scope —
//! no pidfile, no detach, no interactive menu. It reads one env-selected
//! config path, binds a listener, and shuts down cleanly on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use mcpx_gateway::prelude::*;

#[derive(Deserialize)]
struct ConfigFile {
    gateway: GatewaySettings,
    #[serde(default)]
    servers: IndexMap<String, UpstreamSpec>,
}

/// Re-reads and re-parses the config file on every `snapshot()` call —
/// the core must never see a cached view across requests (§9).
struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    fn default_snapshot() -> ConfigSnapshot {
        ConfigSnapshot::new(
            GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://mcpx_local_token".to_string(),
            },
            IndexMap::new(),
        )
    }
}

impl ConfigSource for FileConfigSource {
    fn snapshot(&self) -> ConfigSnapshot {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to read config file");
                return Self::default_snapshot();
            }
        };
        match serde_json::from_str::<ConfigFile>(&text) {
            Ok(file) => ConfigSnapshot::new(file.gateway, file.servers),
            Err(e) => {
                tracing::error!(error = %e, "failed to parse config file, serving an empty upstream set");
                Self::default_snapshot()
            }
        }
    }
}

/// The platform secret store is out of scope (§1); this seeds an
/// in-memory stand-in from `MCPX_SECRET_*` env vars, mirroring what
/// `secrets::resolve`'s own env-first lookup already does for values
/// the operator injects directly.
fn env_seeded_secret_store() -> MemorySecretStore {
    const PREFIX: &str = "MCPX_SECRET_";
    std::env::vars().filter_map(|(key, value)| key.strip_prefix(PREFIX).map(|name| (name.to_string(), value))).fold(
        MemorySecretStore::new(),
        |store, (name, value)| store.with_secret(name, value),
    )
}

fn init_logging() {
    let debug = std::env::var("MCPX_GATEWAY_DEBUG").as_deref() == Ok("1");
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| if debug { "debug".to_string() } else { "info".to_string() });
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config_path = std::env::var("MCPX_CONFIG_PATH").unwrap_or_else(|_| "./mcpx.config.json".to_string());
    let config: Arc<dyn ConfigSource> = Arc::new(FileConfigSource {
        path: PathBuf::from(config_path),
    });
    let secrets: Arc<dyn SecretStore> = Arc::new(env_seeded_secret_store());

    let metrics = Arc::new(GatewayMetrics::new());
    let pool = Arc::new(StdioPool::new(metrics.clone()));
    let timeout_ms: u64 = std::env::var("MCPX_UPSTREAM_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30_000);
    let router = Arc::new(UpstreamRouter::new(pool.clone(), timeout_ms));

    let snapshot = config.snapshot();
    let bind_host = std::env::var("MCPX_GATEWAY_BIND").unwrap_or_else(|_| "127.0.0.1".to_string());
    let local_host = format!("{bind_host}:{}", snapshot.gateway.gateway_port);

    let state = AppState {
        config,
        secrets,
        router,
        pool: pool.clone(),
        metrics,
        local_host: local_host.clone(),
        server_version: mcpx_gateway::VERSION.to_string(),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&local_host)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {local_host}: {e}"));
    tracing::info!(addr = %local_host, "mcpx-gateway listening");

    let shutdown = async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutting down, closing stdio children");
        pool.shutdown_all().await;
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!(error = %e, "gateway server exited with an error");
    }
}
