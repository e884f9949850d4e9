//! HTTP upstream calling: one JSON-RPC POST, handling JSON and SSE response
//! bodies and a per-call deadline (§4.4).

use futures_util::StreamExt;
use indexmap::IndexMap;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde_json::Value;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::{JsonRpcResponse, RequestId};
use crate::secrets::{self, SecretStore};

/// Performs JSON-RPC calls against HTTPS upstreams over one shared,
/// connection-pooled client.
pub struct HttpUpstreamCaller {
    client: reqwest::Client,
}

impl HttpUpstreamCaller {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .expect("reqwest client with default rustls config should always build");
        Self { client }
    }

    /// The underlying shared client, reused by the OAuth passthrough
    /// proxy so the whole gateway keeps one connection pool.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn call(
        &self,
        upstream: &str,
        url: &str,
        headers: &IndexMap<String, String>,
        secrets: &dyn SecretStore,
        method: &str,
        params: Value,
        id: RequestId,
        passthrough_authorization: Option<&str>,
        timeout_ms: u64,
    ) -> GatewayResult<Value> {
        let mut request_headers = reqwest::header::HeaderMap::new();
        request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in headers {
            let resolved = secrets::resolve(value, secrets)?;
            if let (Ok(name), Ok(value)) =
                (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&resolved))
            {
                request_headers.insert(name, value);
            }
        }
        if let Some(auth) = passthrough_authorization {
            if let Ok(value) = HeaderValue::from_str(auth) {
                request_headers.insert(AUTHORIZATION, value);
            }
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let deadline = Duration::from_millis(timeout_ms);
        let send = self.client.post(url).headers(request_headers).json(&body).send();
        let response = match tokio::time::timeout(deadline, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(GatewayError::HttpTransport(e.to_string())),
            Err(_) => return Err(GatewayError::upstream_timeout(upstream, method, timeout_ms)),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !status.is_success() {
            let www_authenticate = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = match tokio::time::timeout(deadline, response.text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(_)) => String::new(),
                Err(_) => return Err(GatewayError::upstream_timeout(upstream, method, timeout_ms)),
            };
            return Err(GatewayError::upstream_http(
                upstream,
                status.as_u16(),
                body_text,
                www_authenticate,
            ));
        }

        let rpc_response = if content_type.contains("text/event-stream") {
            parse_sse(response, upstream, method, &id, deadline).await?
        } else {
            let text = match tokio::time::timeout(deadline, response.text()).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => return Err(GatewayError::HttpTransport(e.to_string())),
                Err(_) => return Err(GatewayError::upstream_timeout(upstream, method, timeout_ms)),
            };
            parse_json_body(&text)
                .ok_or_else(|| GatewayError::HttpTransport(format!("{upstream}: unparseable response body")))?
        };

        match rpc_response.error {
            Some(err) => Err(GatewayError::upstream_rpc(upstream, err.message)),
            None => Ok(rpc_response.result.unwrap_or(Value::Null)),
        }
    }
}

impl Default for HttpUpstreamCaller {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort parse of a plain/empty-content-type body as a single
/// JSON-RPC response object (§4.4: "Other or empty -> attempt best-effort
/// JSON parse").
fn parse_json_body(text: &str) -> Option<JsonRpcResponse> {
    serde_json::from_str(text).ok()
}

/// Hand-rolled SSE state machine: accumulate `data:` lines, join them with
/// `\n`, flush the event on a blank line, JSON-parse it, and return the
/// first event whose id matches the request — or the last parseable event
/// if none did (§4.4).
async fn parse_sse(
    response: reqwest::Response,
    upstream: &str,
    method: &str,
    want_id: &RequestId,
    deadline: Duration,
) -> GatewayResult<JsonRpcResponse> {
    let mut stream = response.bytes_stream();
    let mut buf = String::new();
    let mut data_lines: Vec<String> = Vec::new();
    let mut last_parsed: Option<JsonRpcResponse> = None;

    loop {
        let chunk = match tokio::time::timeout(deadline, stream.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => return Err(GatewayError::HttpTransport(e.to_string())),
            Ok(None) => break,
            Err(_) => {
                return Err(GatewayError::upstream_timeout(
                    upstream,
                    method,
                    deadline.as_millis() as u64,
                ))
            }
        };
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find('\n') {
            let line = buf[..pos].trim_end_matches('\r').to_string();
            buf.drain(..=pos);

            if line.is_empty() {
                if let Some(event) = flush_sse_event(&mut data_lines, want_id, &mut last_parsed) {
                    return Ok(event);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
    }

    if let Some(event) = flush_sse_event(&mut data_lines, want_id, &mut last_parsed) {
        return Ok(event);
    }

    last_parsed
        .ok_or_else(|| GatewayError::HttpTransport(format!("{upstream}: no parseable SSE event for {method}")))
}

fn flush_sse_event(
    data_lines: &mut Vec<String>,
    want_id: &RequestId,
    last_parsed: &mut Option<JsonRpcResponse>,
) -> Option<JsonRpcResponse> {
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    data_lines.clear();
    let parsed: JsonRpcResponse = serde_json::from_str(&data).ok()?;
    if parsed.id == *want_id {
        return Some(parsed);
    }
    *last_parsed = Some(parsed);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_effort_json_body_parse() {
        let parsed = parse_json_body(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(parsed.result, Some(serde_json::json!({"tools": []})));
    }

    #[test]
    fn best_effort_parse_fails_on_garbage() {
        assert!(parse_json_body("not json").is_none());
    }

    #[test]
    fn sse_event_flush_matches_requested_id() {
        let mut lines = vec!["{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}".to_string()];
        let mut last = None;
        let event = flush_sse_event(&mut lines, &RequestId::Number(7), &mut last);
        assert!(event.is_some());
        assert!(lines.is_empty());
    }

    #[test]
    fn sse_event_flush_remembers_non_matching_as_last() {
        let mut lines = vec!["{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}".to_string()];
        let mut last = None;
        let event = flush_sse_event(&mut lines, &RequestId::Number(7), &mut last);
        assert!(event.is_none());
        assert!(last.is_some());
    }

    #[test]
    fn sse_multiline_data_joins_with_newline() {
        let mut lines = vec!["{\"jsonrpc\":\"2.0\",".to_string(), "\"id\":1,\"result\":{}}".to_string()];
        let mut last = None;
        let event = flush_sse_event(&mut lines, &RequestId::Number(1), &mut last);
        assert!(event.is_some());
    }
}
