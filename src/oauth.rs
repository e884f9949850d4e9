//! Well-known OAuth endpoint proxying and `WWW-Authenticate` rewriting
//! (§4.8).

use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde_json::Value;

use crate::config::{ConfigSnapshot, UpstreamSpec};
use crate::error::{GatewayError, GatewayResult};
use crate::secrets::{self, SecretStore};

/// The three well-known paths the gateway proxies unauthenticated.
pub const WELL_KNOWN_PREFIXES: &[&str] = &[
    "/.well-known/oauth-protected-resource",
    "/.well-known/oauth-authorization-server",
    "/.well-known/openid-configuration",
];

/// A proxied well-known response, ready for the HTTP front to mirror
/// onto its own response.
pub struct WellKnownResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub www_authenticate: Option<String>,
    pub body: Vec<u8>,
}

/// Picks the single HTTP upstream this well-known request targets, per
/// §4.8: either the sole configured upstream, or the one named by
/// `?upstream=`. `None` means "not operative" — the caller must respond
/// 404.
fn scoped_http_upstream<'a>(config: &'a ConfigSnapshot, scope: Option<&str>) -> Option<(&'a str, &'a UpstreamSpec)> {
    match scope {
        Some(name) => {
            let spec = config.get(name)?;
            spec.is_http().then(|| (name, spec))
        }
        None => {
            let name = config.sole_upstream()?;
            let spec = config.get(name)?;
            spec.is_http().then(|| (name, spec))
        }
    }
}

/// Computes the upstream URL to forward a well-known request to: the
/// upstream base URL's origin, the well-known prefix, then the
/// upstream's configured path minus any trailing slash.
fn compute_well_known_url(prefix: &str, upstream_url: &str) -> GatewayResult<String> {
    let parsed = url::Url::parse(upstream_url)
        .map_err(|e| GatewayError::HttpTransport(format!("invalid upstream url: {e}")))?;
    let origin = parsed.origin().ascii_serialization();
    let path = parsed.path().trim_end_matches('/');
    Ok(format!("{origin}{prefix}{path}"))
}

/// Proxies one well-known GET request. Returns `Ok(None)` when no single
/// HTTP upstream is in scope (the caller must respond 404).
pub async fn proxy_well_known(
    client: &reqwest::Client,
    config: &ConfigSnapshot,
    prefix: &str,
    scope: Option<&str>,
    secrets: &dyn SecretStore,
    mcp_protocol_version: Option<&str>,
    local_host: &str,
) -> GatewayResult<Option<WellKnownResponse>> {
    let Some((name, spec)) = scoped_http_upstream(config, scope) else {
        return Ok(None);
    };
    let UpstreamSpec::Http { url, headers } = spec else {
        return Ok(None);
    };

    let target = compute_well_known_url(prefix, url)?;

    let mut request_headers = reqwest::header::HeaderMap::new();
    request_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(version) = mcp_protocol_version {
        if let Ok(value) = HeaderValue::from_str(version) {
            request_headers.insert("mcp-protocol-version", value);
        }
    }
    for (key, value) in headers {
        let resolved = secrets::resolve(value, secrets)?;
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&resolved),
        ) {
            request_headers.insert(name, value);
        }
    }

    let response = client
        .get(&target)
        .headers(request_headers)
        .send()
        .await
        .map_err(|e| GatewayError::HttpTransport(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    let cache_control = response.headers().get(CACHE_CONTROL).and_then(|v| v.to_str().ok()).map(str::to_string);
    let www_authenticate = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::HttpTransport(e.to_string()))?;

    let body = if prefix == "/.well-known/oauth-protected-resource"
        && (200..300).contains(&status)
        && content_type.as_deref().is_some_and(|ct| ct.contains("json"))
    {
        rewrite_resource_body(&body, local_host, scope).unwrap_or_else(|| body.to_vec())
    } else {
        body.to_vec()
    };

    let www_authenticate = www_authenticate.map(|header| rewrite_www_authenticate(&header, local_host, scope));

    Ok(Some(WellKnownResponse {
        status,
        content_type,
        cache_control,
        www_authenticate,
        body,
    }))
}

/// Builds the local gateway's own `resource`/`resource_metadata` URL,
/// preserving the `?upstream=` scope if the request carried one.
fn local_protected_resource_url(local_host: &str, scope: Option<&str>) -> String {
    match scope {
        Some(name) => format!("http://{local_host}/.well-known/oauth-protected-resource?upstream={name}"),
        None => format!("http://{local_host}/.well-known/oauth-protected-resource"),
    }
}

fn local_mcp_url(local_host: &str, scope: Option<&str>) -> String {
    match scope {
        Some(name) => format!("http://{local_host}/mcp?upstream={name}"),
        None => format!("http://{local_host}/mcp"),
    }
}

/// Overwrites the `resource` field of a `/.well-known/oauth-protected-resource`
/// JSON body to point at the local gateway. `None` if the body is not a
/// JSON object (left untouched by the caller in that case).
fn rewrite_resource_body(body: &[u8], local_host: &str, scope: Option<&str>) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object_mut()?;
    obj.insert("resource".to_string(), Value::String(local_mcp_url(local_host, scope)));
    serde_json::to_vec(&value).ok()
}

/// Rewrites (or appends) the `resource_metadata="..."` parameter of a
/// `WWW-Authenticate` header value to point at the local gateway's
/// well-known endpoint (§4.8, and the auth-challenge hoisting path in
/// §4.9).
pub fn rewrite_www_authenticate(header: &str, local_host: &str, scope: Option<&str>) -> String {
    let replacement = local_protected_resource_url(local_host, scope);
    const MARKER: &str = "resource_metadata=\"";

    if let Some(start) = header.find(MARKER) {
        let value_start = start + MARKER.len();
        if let Some(rel_end) = header[value_start..].find('"') {
            let end = value_start + rel_end;
            return format!("{}{}\"{}", &header[..value_start], replacement, &header[end + 1..]);
        }
    }

    format!("{header}, resource_metadata=\"{replacement}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn http_spec(url: &str) -> UpstreamSpec {
        UpstreamSpec::Http {
            url: url.to_string(),
            headers: IndexMap::new(),
        }
    }

    #[test]
    fn well_known_url_appends_prefix_and_upstream_path() {
        let url = compute_well_known_url("/.well-known/oauth-protected-resource", "https://host/mcp").unwrap();
        assert_eq!(url, "https://host/.well-known/oauth-protected-resource/mcp");
    }

    #[test]
    fn well_known_url_strips_trailing_slash() {
        let url = compute_well_known_url("/.well-known/oauth-protected-resource", "https://host/mcp/").unwrap();
        assert_eq!(url, "https://host/.well-known/oauth-protected-resource/mcp");
    }

    #[test]
    fn scoped_http_upstream_uses_sole_upstream_when_unscoped() {
        let mut servers = IndexMap::new();
        servers.insert("vercel".to_string(), http_spec("https://v.example/mcp"));
        let config = ConfigSnapshot::new(
            crate::config::GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://t".to_string(),
            },
            servers,
        );
        let (name, _) = scoped_http_upstream(&config, None).unwrap();
        assert_eq!(name, "vercel");
    }

    #[test]
    fn scoped_http_upstream_is_none_when_multiple_and_unscoped() {
        let mut servers = IndexMap::new();
        servers.insert("a".to_string(), http_spec("https://a.example/mcp"));
        servers.insert("b".to_string(), http_spec("https://b.example/mcp"));
        let config = ConfigSnapshot::new(
            crate::config::GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://t".to_string(),
            },
            servers,
        );
        assert!(scoped_http_upstream(&config, None).is_none());
        assert!(scoped_http_upstream(&config, Some("a")).is_some());
    }

    #[test]
    fn rewrite_resource_body_overwrites_resource_field() {
        let body = br#"{"resource":"https://example.com/"}"#;
        let rewritten = rewrite_resource_body(body, "127.0.0.1:4890", None).unwrap();
        let value: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(value["resource"], "http://127.0.0.1:4890/mcp");
    }

    #[test]
    fn rewrite_resource_body_preserves_scope() {
        let body = br#"{"resource":"https://example.com/"}"#;
        let rewritten = rewrite_resource_body(body, "127.0.0.1:4890", Some("vercel")).unwrap();
        let value: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(value["resource"], "http://127.0.0.1:4890/mcp?upstream=vercel");
    }

    #[test]
    fn rewrite_www_authenticate_replaces_existing_resource_metadata() {
        let header = r#"Bearer error="invalid_token", resource_metadata="https://mcp.vercel.com/.well-known/oauth-protected-resource""#;
        let rewritten = rewrite_www_authenticate(header, "127.0.0.1:4890", None);
        assert!(rewritten.contains(r#"resource_metadata="http://127.0.0.1:4890/.well-known/oauth-protected-resource""#));
        assert!(!rewritten.contains("mcp.vercel.com"));
    }

    #[test]
    fn rewrite_www_authenticate_appends_when_missing() {
        let header = r#"Bearer error="invalid_token""#;
        let rewritten = rewrite_www_authenticate(header, "127.0.0.1:4890", Some("vercel"));
        assert!(rewritten.contains(r#"resource_metadata="http://127.0.0.1:4890/.well-known/oauth-protected-resource?upstream=vercel""#));
    }
}
