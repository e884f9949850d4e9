//! The stdio connection pool (§4.3).
//!
//! Keyed by upstream name. Each entry holds a fingerprint and a lazily
//! connected client behind a `tokio::sync::OnceCell`, so the first caller
//! for a fresh upstream spawns the child while everyone else racing in
//! behind it shares that one spawn attempt. A config mutation (different
//! fingerprint) or a transport error replaces the entry outright; the old
//! one is closed in a detached task, never awaited from the evicting
//! caller's own request.

mod stdio_client;

pub use stdio_client::StdioClient;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{ConfigSnapshot, UpstreamSpec};
use crate::error::{GatewayError, GatewayResult};
use crate::fingerprint::{self, Fingerprint};
use crate::metrics::GatewayMetrics;
use crate::secrets::SecretStore;

struct PoolEntry {
    fingerprint: Fingerprint,
    cell: OnceCell<Result<Arc<StdioClient>, String>>,
}

impl PoolEntry {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            cell: OnceCell::new(),
        }
    }
}

/// The pool: one entry per upstream name currently holding a live or
/// in-flight stdio connection.
pub struct StdioPool {
    entries: DashMap<String, Arc<PoolEntry>>,
    metrics: Arc<GatewayMetrics>,
}

impl StdioPool {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
        }
    }

    /// Acquires the client for `name`, spawning it on first use or after
    /// eviction. `spec` MUST be [`UpstreamSpec::Stdio`].
    pub async fn acquire(
        &self,
        name: &str,
        spec: &UpstreamSpec,
        secrets: &dyn SecretStore,
    ) -> GatewayResult<Arc<StdioClient>> {
        let UpstreamSpec::Stdio {
            command,
            args,
            env,
            cwd,
        } = spec
        else {
            return Err(GatewayError::stdio_transport(name, "not a stdio upstream"));
        };

        let fp = fingerprint::fingerprint(spec);

        loop {
            let entry = self
                .entries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(PoolEntry::new(fp.clone())))
                .clone();

            if entry.fingerprint != fp {
                // Configuration mutated under us: replace the entry and
                // close the old one asynchronously, without waiting on it.
                self.entries.remove_if(name, |_, e| Arc::ptr_eq(e, &entry));
                self.schedule_close(entry);
                continue;
            }

            let result = entry
                .cell
                .get_or_try_init(|| async {
                    StdioClient::connect(name, command, args, env, cwd.as_deref(), secrets, &self.metrics)
                        .await
                        .map(Arc::new)
                        .map_err(|e| e.to_string())
                })
                .await;

            match result {
                Ok(client) if client.is_dead() => {
                    // A previously-healthy connection died between calls;
                    // drop it and spin once more to create a fresh one.
                    self.entries.remove_if(name, |_, e| Arc::ptr_eq(e, &entry));
                    self.schedule_close(entry.clone());
                    continue;
                }
                Ok(client) => return Ok(client.clone()),
                Err(message) => {
                    self.entries.remove_if(name, |_, e| Arc::ptr_eq(e, &entry));
                    return Err(GatewayError::stdio_transport(name, message.clone()));
                }
            }
        }
    }

    /// Evicts and closes the entry for `name`, if present. Called after any
    /// transport-level error surfaces from a call (§4.3 point 4).
    pub fn invalidate(&self, name: &str) {
        if let Some((_, entry)) = self.entries.remove(name) {
            self.schedule_close(entry);
        }
    }

    /// Evicts entries whose upstream was removed from the configuration,
    /// is no longer a stdio upstream, or whose fingerprint has changed —
    /// run before dispatching every request (§4.9).
    pub fn reconcile(&self, config: &ConfigSnapshot) {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter_map(|kv| {
                let name = kv.key().clone();
                match config.get(&name) {
                    None => Some(name),
                    Some(spec) if !spec.is_stdio() => Some(name),
                    Some(spec) => {
                        let fp = fingerprint::fingerprint(spec);
                        (fp != kv.value().fingerprint).then_some(name)
                    }
                }
            })
            .collect();

        for name in stale {
            self.invalidate(&name);
        }
    }

    /// Closes every entry. Called once on gateway shutdown.
    pub async fn shutdown_all(&self) {
        let entries: Vec<Arc<PoolEntry>> = self
            .entries
            .iter()
            .map(|kv| kv.value().clone())
            .collect();
        self.entries.clear();
        for entry in entries {
            if let Some(Ok(client)) = entry.cell.get() {
                client.shutdown().await;
            }
        }
    }

    fn schedule_close(&self, entry: Arc<PoolEntry>) {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Some(Ok(client)) = entry.cell.get() {
                client.shutdown().await;
                metrics.inc_stdio_evicted();
            }
        });
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::EmptySecretStore;
    use indexmap::IndexMap;

    fn echo_spec(marker: &str) -> UpstreamSpec {
        UpstreamSpec::Stdio {
            command: "/bin/cat".to_string(),
            args: vec![marker.to_string()],
            env: IndexMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn acquiring_twice_with_same_spec_reuses_the_entry() {
        let pool = StdioPool::new(Arc::new(GatewayMetrics::new()));
        let spec = echo_spec("a");
        let store = EmptySecretStore;

        let first = pool.acquire("fixture", &spec, &store).await;
        // /bin/cat spawns fine as a stdio child even though it isn't a
        // real MCP server; we only assert pool bookkeeping here.
        assert!(first.is_ok());
        assert_eq!(pool.entry_count(), 1);

        let second = pool.acquire("fixture", &spec, &store).await.unwrap();
        assert!(Arc::ptr_eq(&first.unwrap(), &second));
    }

    #[tokio::test]
    async fn fingerprint_change_replaces_the_entry() {
        let pool = StdioPool::new(Arc::new(GatewayMetrics::new()));
        let store = EmptySecretStore;

        let first = pool.acquire("fixture", &echo_spec("a"), &store).await.unwrap();
        let second = pool.acquire("fixture", &echo_spec("b"), &store).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.entry_count(), 1);
    }

    #[tokio::test]
    async fn reconcile_evicts_removed_upstream() {
        let pool = StdioPool::new(Arc::new(GatewayMetrics::new()));
        let store = EmptySecretStore;
        pool.acquire("fixture", &echo_spec("a"), &store).await.unwrap();

        let empty = ConfigSnapshot::new(
            crate::config::GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://t".to_string(),
            },
            IndexMap::new(),
        );
        pool.reconcile(&empty);
        assert_eq!(pool.entry_count(), 0);
    }
}
