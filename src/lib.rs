//! mcpx-gateway: a local HTTP gateway that multiplexes a Model Context
//! Protocol catalog from multiple upstream servers — each reachable over
//! HTTPS JSON-RPC or as a stdio child process — to any number of local
//! MCP clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ GatewayHttpFront (axum)                                  │
//! │ • local auth, well-known OAuth proxy, JSON-RPC dispatch  │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ CatalogMerger / NamespacedCallRouter                     │
//! │ • merges */list across upstreams, routes tools/call etc. │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ UpstreamRouter                                           │
//! │ • HttpUpstreamCaller          • StdioConnectionPool      │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod oauth;
pub mod pool;
pub mod router;
pub mod rpc;
pub mod secrets;
pub mod server;
pub mod upstream;

pub use error::{GatewayError, GatewayResult};

/// Commonly used types, re-exported for binaries and integration tests.
pub mod prelude {
    pub use crate::config::{ConfigSnapshot, ConfigSource, GatewaySettings, StaticConfigSource, UpstreamSpec};
    pub use crate::error::{GatewayError, GatewayResult};
    pub use crate::metrics::GatewayMetrics;
    pub use crate::pool::StdioPool;
    pub use crate::secrets::{EmptySecretStore, MemorySecretStore, SecretStore};
    pub use crate::server::{build_router, AppState};
    pub use crate::upstream::UpstreamRouter;
}

/// Version of this gateway crate, reported in `initialize`'s `serverInfo`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default MCP protocol version synthesized by `initialize` when the
/// client did not request one (§4.9).
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-11-25";
