//! The HTTP front end: route table, local-auth middleware, and the
//! state every handler shares (§4.9).

pub mod auth;
pub mod front;

pub use front::{build_router, AppState};
