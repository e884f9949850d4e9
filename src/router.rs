//! Namespaced identifier parsing and call routing for `tools/call`,
//! `resources/read`, `prompts/get` (§4.7).

use serde_json::Value;

use crate::config::ConfigSnapshot;
use crate::error::{GatewayError, GatewayResult};
use crate::rpc::RequestId;
use crate::secrets::SecretStore;
use crate::upstream::UpstreamRouter;

/// Which field of `params` carries the identifier for a given method.
fn identifier_field(method: &str) -> &'static str {
    match method {
        "resources/read" => "uri",
        _ => "name",
    }
}

/// A parsed identifier: the server it names (if namespaced) and the
/// upstream-local identifier with any namespace prefix stripped.
struct ParsedIdentifier {
    server: Option<String>,
    local: String,
}

/// Parses `"server.name"` tool/prompt identifiers and
/// `"mcpx://server/<encoded>"` resource uris. Anything that doesn't match
/// either shape is returned as an unnamespaced local identifier.
fn parse_identifier(method: &str, raw: &str) -> ParsedIdentifier {
    if method == "resources/read" {
        if let Some(rest) = raw.strip_prefix("mcpx://") {
            if let Some((server, encoded)) = rest.split_once('/') {
                let local = urlencoding::decode(encoded)
                    .map(|cow| cow.into_owned())
                    .unwrap_or_else(|_| encoded.to_string());
                return ParsedIdentifier {
                    server: Some(server.to_string()),
                    local,
                };
            }
        }
        return ParsedIdentifier {
            server: None,
            local: raw.to_string(),
        };
    }

    match raw.split_once('.') {
        Some((server, local)) => ParsedIdentifier {
            server: Some(server.to_string()),
            local: local.to_string(),
        },
        None => ParsedIdentifier {
            server: None,
            local: raw.to_string(),
        },
    }
}

/// Resolves which upstream a call targets and the upstream-local
/// identifier to write back into `params`, per §4.7's scoped/unscoped
/// resolution rules.
fn resolve_target<'a>(
    config: &'a ConfigSnapshot,
    method: &str,
    identifier: &str,
    scope: Option<&str>,
) -> GatewayResult<(&'a str, String)> {
    let parsed = parse_identifier(method, identifier);

    if let Some(scoped_name) = scope {
        return match parsed.server {
            Some(server) if server != scoped_name => Err(GatewayError::invalid_params(format!(
                "identifier namespaced for '{server}' does not match scope '{scoped_name}'"
            ))),
            _ => {
                let name = config
                    .iter()
                    .find(|(n, _)| *n == scoped_name)
                    .map(|(n, _)| n)
                    .ok_or_else(|| GatewayError::unknown_upstream(scoped_name))?;
                Ok((name, parsed.local))
            }
        };
    }

    match parsed.server {
        Some(server) => {
            let name = config
                .iter()
                .find(|(n, _)| *n == server)
                .map(|(n, _)| n)
                .ok_or_else(|| GatewayError::unknown_upstream(server))?;
            Ok((name, parsed.local))
        }
        None => match config.sole_upstream() {
            Some(name) => Ok((name, parsed.local)),
            None => Err(GatewayError::invalid_params(
                "ambiguous identifier: multiple upstreams configured, a namespaced identifier is required",
            )),
        },
    }
}

/// Routes one `tools/call` / `resources/read` / `prompts/get` request:
/// resolves the target upstream, rewrites the identifier field in
/// `params` to the upstream-local form, and forwards via
/// [`UpstreamRouter`].
#[allow(clippy::too_many_arguments)]
pub async fn route_call(
    router: &UpstreamRouter,
    config: &ConfigSnapshot,
    method: &str,
    mut params: Value,
    id: RequestId,
    scope: Option<&str>,
    secrets: &dyn SecretStore,
    passthrough_authorization: Option<&str>,
) -> GatewayResult<Value> {
    let field = identifier_field(method);
    let identifier = params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_params(format!("missing params.{field}")))?
        .to_string();

    let (upstream_name, local_identifier) = resolve_target(config, method, &identifier, scope)?;
    let spec = config
        .get(upstream_name)
        .ok_or_else(|| GatewayError::unknown_upstream(upstream_name))?;

    if let Some(obj) = params.as_object_mut() {
        obj.insert(field.to_string(), Value::String(local_identifier));
    }

    router
        .call(
            upstream_name,
            spec,
            method,
            params,
            id,
            secrets,
            passthrough_authorization,
        )
        .await
}
