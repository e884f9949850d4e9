//! The gateway's HTTP front end (§4.9): the `/mcp` JSON-RPC endpoint and
//! the three unauthenticated well-known OAuth proxy routes.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Extension, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::catalog;
use crate::config::{ConfigSnapshot, ConfigSource};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::oauth;
use crate::pool::StdioPool;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RequestEnvelope, RequestId, ResponseEnvelope};
use crate::router;
use crate::secrets::SecretStore;
use crate::upstream::UpstreamRouter;

use super::auth::{self, AuthContext};

const MAX_BODY_BYTES: usize = 2_000_000;

/// Shared state handed to every route. Cheap to clone — everything
/// behind it is an `Arc` or a trait object.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<dyn ConfigSource>,
    pub secrets: Arc<dyn SecretStore>,
    pub router: Arc<UpstreamRouter>,
    pub pool: Arc<StdioPool>,
    pub metrics: Arc<GatewayMetrics>,
    /// `host:port` the gateway itself is reachable at, used to build
    /// self-referential URLs in OAuth passthrough rewriting.
    pub local_host: String,
    pub server_version: String,
}

#[derive(Deserialize, Default)]
struct UpstreamQuery {
    upstream: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/mcp", get(mcp_get).post(mcp_post))
        .route_layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::local_auth));

    let well_known = Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(well_known_protected_resource),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(well_known_authorization_server),
        )
        .route("/.well-known/openid-configuration", get(well_known_openid_configuration));

    Router::new()
        .merge(protected)
        .merge(well_known)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn mcp_get() -> Response {
    Json(serde_json::json!({"ok": true, "server": "mcpx"})).into_response()
}

async fn mcp_post(
    State(state): State<AppState>,
    Query(query): Query<UpstreamQuery>,
    headers: HeaderMap,
    Extension(auth_ctx): Extension<AuthContext>,
    body: Bytes,
) -> Response {
    let config = state.config.snapshot();
    state.pool.reconcile(&config);

    let envelope: RequestEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return malformed_response(e),
    };
    let is_batch = envelope.is_batch();
    let requests = envelope.into_vec();

    let mut session_id: Option<Uuid> = None;
    let mut responses = Vec::with_capacity(requests.len());

    for request in requests {
        if request.method == "initialize" {
            session_id = Some(Uuid::new_v4());
        }
        if request.is_notification() {
            continue;
        }
        let id = request.id.clone().expect("non-notification request carries an id");

        match dispatch(&state, &config, &request, query.upstream.as_deref(), &auth_ctx).await {
            Ok(result) => {
                state.metrics.inc_requests_forwarded();
                responses.push(JsonRpcResponse::success(id, result));
            }
            Err(err) if err.is_auth_challenge() => {
                return hoist_auth_challenge(&state, &err, query.upstream.as_deref());
            }
            Err(err) => {
                state.metrics.inc_requests_failed();
                responses.push(JsonRpcResponse::error(id, err.rpc_code(), err.sanitize()));
            }
        }
    }

    let wants_sse = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    let mut response = render_response(responses, is_batch, wants_sse);
    if let Some(session_id) = session_id {
        let value = session_id.to_string();
        if let Ok(header_value) = axum::http::HeaderValue::from_str(&value) {
            response.headers_mut().insert("mcp-session-id", header_value.clone());
            response.headers_mut().insert("MCP-Session-Id", header_value);
        }
    }
    response
}

/// Routes one request object to its handler. `initialize`/`ping`/the
/// list methods/the call methods are all handled here; everything else
/// is `UnknownMethod`.
async fn dispatch(
    state: &AppState,
    config: &ConfigSnapshot,
    request: &JsonRpcRequest,
    scope: Option<&str>,
    auth_ctx: &AuthContext,
) -> Result<Value, GatewayError> {
    let passthrough = auth_ctx.passthrough_authorization.as_deref();

    match request.method.as_str() {
        "initialize" => {
            let protocol_version = request
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or("2025-11-25");
            Ok(serde_json::json!({
                "protocolVersion": protocol_version,
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
                "serverInfo": {"name": "mcpx", "version": state.server_version},
            }))
        }
        "ping" => Ok(serde_json::json!({"ok": true})),
        "tools/list" | "resources/list" | "prompts/list" => {
            let started = std::time::Instant::now();
            let result =
                catalog::merge_list(&state.router, config, &request.method, scope, state.secrets.as_ref(), passthrough)
                    .await;
            state.metrics.record_catalog_merge_latency_us(started.elapsed().as_micros() as u64);
            result
        }
        "tools/call" | "resources/read" | "prompts/get" => {
            let params = request.params.clone().unwrap_or(Value::Null);
            let id = request.id.clone().unwrap_or(RequestId::Null);
            router::route_call(
                &state.router,
                config,
                &request.method,
                params,
                id,
                scope,
                state.secrets.as_ref(),
                passthrough,
            )
            .await
        }
        other => Err(GatewayError::unknown_method(other)),
    }
}

fn malformed_response(err: serde_json::Error) -> Response {
    let gateway_err = GatewayError::malformed(err.to_string());
    let body = JsonRpcResponse::error(RequestId::Null, gateway_err.rpc_code(), gateway_err.sanitize());
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Rewrites the whole HTTP response to the upstream's auth-challenge
/// status, bypassing JSON-RPC framing entirely (§4.9).
fn hoist_auth_challenge(state: &AppState, err: &GatewayError, scope: Option<&str>) -> Response {
    let GatewayError::UpstreamHttpError {
        status,
        body_text,
        www_authenticate,
        ..
    } = err
    else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut builder = axum::http::Response::builder().status(*status);
    if let Some(header) = www_authenticate {
        let rewritten = oauth::rewrite_www_authenticate(header, &state.local_host, scope);
        builder = builder.header(WWW_AUTHENTICATE, rewritten);
    }
    builder
        .body(Body::from(body_text.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Frames the batch's responses either as SSE events or a plain JSON
/// body, mirroring the request's batch-ness for the JSON case (§4.9).
fn render_response(responses: Vec<JsonRpcResponse>, is_batch: bool, wants_sse: bool) -> Response {
    if wants_sse {
        let mut body = String::new();
        for response in &responses {
            let json = serde_json::to_string(response).unwrap_or_default();
            body.push_str("event: message\ndata: ");
            body.push_str(&json);
            body.push_str("\n\n");
        }
        return axum::http::Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    if is_batch {
        Json(ResponseEnvelope::Batch(responses)).into_response()
    } else {
        match responses.into_iter().next() {
            Some(response) => Json(ResponseEnvelope::Single(response)).into_response(),
            // A single request that was itself a notification has no
            // response to frame; an empty 200 matches "yields none".
            None => StatusCode::OK.into_response(),
        }
    }
}

async fn well_known_protected_resource(
    state: State<AppState>,
    query: Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    well_known_response(state, oauth::WELL_KNOWN_PREFIXES[0], query, headers).await
}

async fn well_known_authorization_server(
    state: State<AppState>,
    query: Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    well_known_response(state, oauth::WELL_KNOWN_PREFIXES[1], query, headers).await
}

async fn well_known_openid_configuration(
    state: State<AppState>,
    query: Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    well_known_response(state, oauth::WELL_KNOWN_PREFIXES[2], query, headers).await
}

async fn well_known_response(
    State(state): State<AppState>,
    prefix: &str,
    Query(query): Query<UpstreamQuery>,
    headers: HeaderMap,
) -> Response {
    let config = state.config.snapshot();
    let mcp_protocol_version = headers.get("mcp-protocol-version").and_then(|v| v.to_str().ok());

    match oauth::proxy_well_known(
        state.router.http_client(),
        &config,
        prefix,
        query.upstream.as_deref(),
        state.secrets.as_ref(),
        mcp_protocol_version,
        &state.local_host,
    )
    .await
    {
        Ok(Some(proxied)) => {
            let mut builder = axum::http::Response::builder().status(proxied.status);
            if let Some(content_type) = &proxied.content_type {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            if let Some(cache_control) = &proxied.cache_control {
                builder = builder.header(CACHE_CONTROL, cache_control);
            }
            if let Some(www_authenticate) = &proxied.www_authenticate {
                builder = builder.header(WWW_AUTHENTICATE, www_authenticate);
            }
            builder
                .body(Body::from(proxied.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::BAD_GATEWAY, err.sanitize()).into_response(),
    }
}
