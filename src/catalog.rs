//! Merges `*/list` catalogs across the upstreams in scope, namespacing
//! item names and resource URIs when more than one upstream contributes
//! (§4.6).

use serde_json::Value;

use crate::config::ConfigSnapshot;
use crate::error::{GatewayError, GatewayResult};
use crate::rpc::RequestId;
use crate::secrets::SecretStore;
use crate::upstream::UpstreamRouter;

fn list_key(method: &str) -> &'static str {
    match method {
        "tools/list" => "tools",
        "resources/list" => "resources",
        "prompts/list" => "prompts",
        _ => unreachable!("merge_list only called for */list methods"),
    }
}

/// Executes `method` (one of `tools/list`, `resources/list`,
/// `prompts/list`) across every upstream in scope, concurrently, and
/// returns the merged, namespaced result.
pub async fn merge_list(
    router: &UpstreamRouter,
    config: &ConfigSnapshot,
    method: &str,
    scope: Option<&str>,
    secrets: &dyn SecretStore,
    passthrough_authorization: Option<&str>,
) -> GatewayResult<Value> {
    let key = list_key(method);

    let upstreams: Vec<(&str, &crate::config::UpstreamSpec)> = match scope {
        Some(name) => {
            let spec = config
                .get(name)
                .ok_or_else(|| GatewayError::unknown_upstream(name))?;
            vec![(name, spec)]
        }
        None => config.iter().collect(),
    };

    let flat = upstreams.len() == 1;

    // join_all preserves input order in its output, which is how we
    // satisfy "items from upstream A precede items from upstream B iff
    // the configuration lists A before B" (§5) without extra bookkeeping.
    let calls = upstreams.iter().map(|(name, spec)| {
        let name = (*name).to_string();
        async move {
            let result = router
                .call(
                    &name,
                    spec,
                    method,
                    serde_json::json!({}),
                    RequestId::Number(0),
                    secrets,
                    passthrough_authorization,
                )
                .await;
            (name, result)
        }
    });
    let results: Vec<(String, GatewayResult<Value>)> = futures_util::future::join_all(calls).await;

    // Scope-of-one auth challenges hoist to the HTTP layer instead of
    // being swallowed like any other per-upstream failure (§4.6).
    if flat {
        if let Some((_, Err(_))) = results.first() {
            let (_, err) = results.into_iter().next().unwrap();
            let err = err.unwrap_err();
            return if err.is_auth_challenge() {
                Err(err)
            } else {
                Ok(serde_json::json!({ key: Vec::<Value>::new() }))
            };
        }
    }

    let mut merged = Vec::new();
    for (name, result) in results {
        let value = match result {
            Ok(v) => v,
            Err(_) => continue,
        };
        let items = value
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for mut item in items {
            if !flat {
                namespace_item(&mut item, &name, method);
            }
            merged.push(item);
        }
    }

    Ok(serde_json::json!({ key: merged }))
}

/// Rewrites one catalog item's `name` to `"<server>.<name>"`, and for
/// resources its `uri` to `mcpx://<server>/<urlEncoded(uri)>`. All other
/// fields pass through unchanged.
fn namespace_item(item: &mut Value, server: &str, method: &str) {
    let Some(obj) = item.as_object_mut() else {
        return;
    };
    if let Some(Value::String(name)) = obj.get("name").cloned() {
        obj.insert("name".to_string(), Value::String(format!("{server}.{name}")));
    }
    if method == "resources/list" {
        if let Some(Value::String(uri)) = obj.get("uri").cloned() {
            let encoded = urlencoding::encode(&uri);
            obj.insert("uri".to_string(), Value::String(format!("mcpx://{server}/{encoded}")));
        }
    }
}
