//! Local authentication and upstream Authorization passthrough (§4.9).

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::GatewayError;
use crate::rpc::{JsonRpcResponse, RequestId};
use crate::secrets;

use super::front::AppState;

const LOCAL_TOKEN_HEADER: &str = "x-mcpx-local-token";

/// Attached to the request's extensions once local auth succeeds, so
/// handlers can read the upstream credential to offer HTTP upstreams
/// without re-deriving it.
#[derive(Clone, Default)]
pub struct AuthContext {
    pub passthrough_authorization: Option<String>,
}

/// Axum middleware enforcing §4.9's local auth rule: authorized iff
/// `x-mcpx-local-token` equals the expected token, OR `Authorization:
/// Bearer <expected>`. On success, computes the passthrough Authorization
/// per the same section and stashes it in an [`AuthContext`] extension.
pub async fn local_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let config = state.config.snapshot();
    let expected = match secrets::resolve(&config.gateway.local_token_ref, state.secrets.as_ref()) {
        Ok(token) => token,
        Err(_) => return unauthorized_response(),
    };

    let local_header = req
        .headers()
        .get(LOCAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bearer_value = auth_header.as_deref().and_then(|v| v.strip_prefix("Bearer "));

    let authorized_by_local_header = local_header.as_deref() == Some(expected.as_str());
    let authorized_by_bearer = bearer_value == Some(expected.as_str());

    if !authorized_by_local_header && !authorized_by_bearer {
        return unauthorized_response();
    }

    let passthrough_authorization = if authorized_by_local_header {
        auth_header
    } else {
        // The client's Authorization header was consumed for local auth
        // itself; there is nothing left to offer upstreams.
        None
    };

    req.extensions_mut().insert(AuthContext {
        passthrough_authorization,
    });
    next.run(req).await
}

fn unauthorized_response() -> Response {
    let body = JsonRpcResponse::error(RequestId::Null, GatewayError::UnauthorizedLocalClient.rpc_code(), "Unauthorized");
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
