//! Single entry point for forwarding one JSON-RPC call to whichever
//! transport an upstream uses (§4.5).

pub mod http;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::UpstreamSpec;
use crate::error::GatewayResult;
use crate::pool::StdioPool;
use crate::rpc::RequestId;
use crate::secrets::SecretStore;
use http::HttpUpstreamCaller;

/// MCP methods a stdio upstream's embedded client supports. Anything else
/// fails with `UnsupportedStdioMethod` (§4.5).
const STDIO_METHODS: &[&str] = &[
    "tools/list",
    "resources/list",
    "prompts/list",
    "tools/call",
    "resources/read",
    "prompts/get",
];

pub struct UpstreamRouter {
    http_caller: HttpUpstreamCaller,
    pool: Arc<StdioPool>,
    timeout_ms: u64,
}

impl UpstreamRouter {
    pub fn new(pool: Arc<StdioPool>, timeout_ms: u64) -> Self {
        Self {
            http_caller: HttpUpstreamCaller::new(),
            pool,
            timeout_ms,
        }
    }

    /// The shared HTTP client, reused by the OAuth passthrough proxy.
    pub fn http_client(&self) -> &reqwest::Client {
        self.http_caller.client()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        &self,
        upstream_name: &str,
        spec: &UpstreamSpec,
        method: &str,
        params: Value,
        id: RequestId,
        secrets: &dyn SecretStore,
        passthrough_authorization: Option<&str>,
    ) -> GatewayResult<Value> {
        match spec {
            UpstreamSpec::Http { url, headers } => {
                self.http_caller
                    .call(
                        upstream_name,
                        url,
                        headers,
                        secrets,
                        method,
                        params,
                        id,
                        passthrough_authorization,
                        self.timeout_ms,
                    )
                    .await
            }
            UpstreamSpec::Stdio { .. } => {
                if !STDIO_METHODS.contains(&method) {
                    return Err(crate::error::GatewayError::UnsupportedStdioMethod(
                        method.to_string(),
                    ));
                }
                let client = self.pool.acquire(upstream_name, spec, secrets).await?;
                let result = client
                    .call(method, params, Duration::from_millis(self.timeout_ms))
                    .await;
                if let Err(e) = &result {
                    if e.is_transport_failure() {
                        self.pool.invalidate(upstream_name);
                    }
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GatewayMetrics;

    #[tokio::test]
    async fn unsupported_stdio_method_is_rejected_before_touching_the_pool() {
        let pool = Arc::new(StdioPool::new(Arc::new(GatewayMetrics::new())));
        let router = UpstreamRouter::new(pool.clone(), 1000);
        let spec = UpstreamSpec::Stdio {
            command: "/bin/cat".to_string(),
            args: vec![],
            env: indexmap::IndexMap::new(),
            cwd: None,
        };
        let store = crate::secrets::EmptySecretStore;
        let result = router
            .call(
                "fixture",
                &spec,
                "completion/complete",
                Value::Null,
                RequestId::Number(1),
                &store,
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(crate::error::GatewayError::UnsupportedStdioMethod(_))
        ));
        assert_eq!(pool.entry_count(), 0);
    }
}
