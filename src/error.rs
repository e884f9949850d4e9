//! Error types for the gateway core.
//!
//! One enum maps 1:1 onto the error taxonomy table: each variant knows its
//! own JSON-RPC error code and, where relevant, the HTTP status it forces.

use thiserror::Error;

/// Result type used throughout the gateway core.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors produced by the gateway core.
///
/// Variants correspond to the rows of the error-handling table: each one
/// is detected at a specific point in the request pipeline and has a fixed
/// disposition (JSON-RPC error code, and for auth challenges an HTTP status
/// override).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Local client failed the `x-mcpx-local-token` / bearer check.
    #[error("Unauthorized")]
    UnauthorizedLocalClient,

    /// Inbound body exceeded the 2MB cap.
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Body could not be parsed as a JSON-RPC request or batch.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Dispatcher received a method it does not implement.
    #[error("Method not found: {0}")]
    UnknownMethod(String),

    /// Params were missing or shaped incorrectly for the method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// `?upstream=X` referred to a name not present in the configuration.
    #[error("Unknown upstream: {0}")]
    UnknownUpstreamScope(String),

    /// A `secret://name` reference could not be resolved.
    #[error("Secret not found: {0}")]
    SecretMissing(String),

    /// An outbound call (HTTP or stdio) exceeded its deadline.
    #[error("{upstream}: {method} timed out after {timeout_ms}ms")]
    UpstreamTimeout {
        upstream: String,
        method: String,
        timeout_ms: u64,
    },

    /// The upstream returned a JSON-RPC `error` object.
    #[error("{upstream}: {message}")]
    UpstreamRpcError { upstream: String, message: String },

    /// The upstream HTTP response was not 2xx.
    #[error("{upstream}: HTTP {status}")]
    UpstreamHttpError {
        upstream: String,
        status: u16,
        body_text: String,
        www_authenticate: Option<String>,
    },

    /// A stdio child process died, closed its pipe, or sent an unparseable
    /// frame. The pool entry for this upstream must be evicted.
    #[error("{upstream}: stdio transport error: {source}")]
    StdioTransportError { upstream: String, source: String },

    /// `call(method)` against a stdio upstream named a method the embedded
    /// client does not support.
    #[error("Unsupported stdio method: {0}")]
    UnsupportedStdioMethod(String),

    /// JSON (de)serialization failure not otherwise classified above.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure not otherwise classified above (child spawn, pipe setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP transport failure (connect refused, DNS, TLS).
    #[error("HTTP transport error: {0}")]
    HttpTransport(String),
}

impl GatewayError {
    /// The JSON-RPC `error.code` this kind maps to, per §7's disposition
    /// column. `UpstreamHttpError` with a 401/403 status has no RPC code —
    /// it hoists to an HTTP-level response instead; callers must check
    /// `is_auth_challenge()` before falling back to this.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::UnauthorizedLocalClient => -32001,
            Self::PayloadTooLarge => -32000,
            Self::MalformedRequest(_) => -32000,
            Self::UnknownMethod(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::UnknownUpstreamScope(_) => -32602,
            Self::SecretMissing(_) => -32000,
            Self::UpstreamTimeout { .. } => -32000,
            Self::UpstreamRpcError { .. } => -32000,
            Self::UpstreamHttpError { .. } => -32000,
            Self::StdioTransportError { .. } => -32000,
            Self::UnsupportedStdioMethod(_) => -32000,
            Self::Serialization(_) => -32000,
            Self::Io(_) => -32000,
            Self::HttpTransport(_) => -32000,
        }
    }

    /// HTTP status this error forces on the *whole* response, bypassing
    /// normal JSON-RPC framing. `None` means the error is reported as a
    /// JSON-RPC error within a normal 200 response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::UnauthorizedLocalClient => Some(401),
            Self::PayloadTooLarge => Some(413),
            Self::MalformedRequest(_) => Some(500),
            Self::UpstreamHttpError { status, .. } if matches!(status, 401 | 403) => Some(*status),
            _ => None,
        }
    }

    /// True for an upstream HTTP response that should drive the client
    /// through an OAuth flow rather than be reported as a JSON-RPC error.
    pub fn is_auth_challenge(&self) -> bool {
        matches!(self, Self::UpstreamHttpError { status, .. } if matches!(status, 401 | 403))
    }

    /// True when the failure is a transport-level break (i/o, process
    /// exit, frame parsing) rather than an application-level JSON-RPC
    /// error returned by the upstream. Only transport failures evict a
    /// stdio pool entry (§4.3 point 4, and the open question in §9).
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::StdioTransportError { .. }
                | Self::UpstreamTimeout { .. }
                | Self::HttpTransport(_)
                | Self::Io(_)
        )
    }

    /// Client-safe message: for most variants this is just `to_string()`,
    /// but internal error detail (raw io errors, serde messages) is
    /// collapsed to a generic phrase so internals never leak into a
    /// JSON-RPC response seen by a local client.
    pub fn sanitize(&self) -> String {
        match self {
            Self::SecretMissing(name) => format!("Secret not found: {name}"),
            Self::UpstreamTimeout {
                upstream,
                method,
                timeout_ms,
            } => format!("{upstream}: {method} timed out after {timeout_ms}ms"),
            Self::UpstreamRpcError { message, .. } => message.clone(),
            Self::UnknownMethod(method) => format!("Method not found: {method}"),
            Self::InvalidParams(detail) => format!("Invalid params: {detail}"),
            Self::UnknownUpstreamScope(name) => format!("Unknown upstream: {name}"),
            Self::UnsupportedStdioMethod(method) => format!("Unsupported stdio method: {method}"),
            Self::MalformedRequest(_) => "Malformed request".to_string(),
            Self::Serialization(_) => "Malformed request".to_string(),
            Self::Io(_) => "Internal error".to_string(),
            Self::HttpTransport(_) => "Upstream unreachable".to_string(),
            Self::StdioTransportError { upstream, .. } => {
                format!("{upstream}: stdio transport error")
            }
            Self::UpstreamHttpError { upstream, status, .. } => {
                format!("{upstream}: HTTP {status}")
            }
            Self::UnauthorizedLocalClient => "Unauthorized".to_string(),
            Self::PayloadTooLarge => "Payload too large".to_string(),
        }
    }

    pub fn secret_missing(name: impl Into<String>) -> Self {
        Self::SecretMissing(name.into())
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedRequest(detail.into())
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::InvalidParams(detail.into())
    }

    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod(method.into())
    }

    pub fn unknown_upstream(name: impl Into<String>) -> Self {
        Self::UnknownUpstreamScope(name.into())
    }

    pub fn stdio_transport(upstream: impl Into<String>, source: impl Into<String>) -> Self {
        Self::StdioTransportError {
            upstream: upstream.into(),
            source: source.into(),
        }
    }

    pub fn upstream_http(
        upstream: impl Into<String>,
        status: u16,
        body_text: impl Into<String>,
        www_authenticate: Option<String>,
    ) -> Self {
        Self::UpstreamHttpError {
            upstream: upstream.into(),
            status,
            body_text: body_text.into(),
            www_authenticate,
        }
    }

    pub fn upstream_rpc(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamRpcError {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn upstream_timeout(upstream: impl Into<String>, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::UpstreamTimeout {
            upstream: upstream.into(),
            method: method.into(),
            timeout_ms,
        }
    }
}
