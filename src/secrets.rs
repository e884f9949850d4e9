//! `secret://name` reference resolution (§4.1).
//!
//! A value is either a literal or a reference; resolving it to plaintext is
//! a pure function over an injected store, so tests can stub the store
//! without touching the real platform keychain.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{GatewayError, GatewayResult};

const SECRET_PREFIX: &str = "secret://";
const ENV_PREFIX: &str = "MCPX_SECRET_";

/// A platform secret store: a single `get(name) -> Option<String>`
/// operation (§6, "Secret store (consumed)"). The real keychain binding is
/// out of scope; this trait is the seam.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<SecretString>;
}

/// Resolves `value` to plaintext. If `value` does not start with
/// `secret://`, it is returned unchanged (it was never a reference).
/// Otherwise the trailing name is looked up via env var
/// `MCPX_SECRET_<name>` first, then the injected store; failing both is a
/// [`GatewayError::SecretMissing`].
pub fn resolve(value: &str, store: &dyn SecretStore) -> GatewayResult<String> {
    let Some(name) = value.strip_prefix(SECRET_PREFIX) else {
        return Ok(value.to_string());
    };

    if let Ok(from_env) = std::env::var(format!("{ENV_PREFIX}{name}")) {
        return Ok(from_env);
    }

    if let Some(secret) = store.get(name) {
        return Ok(secret.expose_secret().to_string());
    }

    Err(GatewayError::secret_missing(name))
}

/// `true` iff `value` is a `secret://` reference (as opposed to a literal).
pub fn is_secret_ref(value: &str) -> bool {
    value.starts_with(SECRET_PREFIX)
}

/// An in-memory [`SecretStore`] seeded from a fixed map. Used by the
/// bootstrap binary to represent "whatever the platform secret store
/// would have held" in environments with no such store, and throughout
/// the test suite.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: std::collections::HashMap<String, SecretString>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), SecretString::from(value.into()));
        self
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.secrets.get(name).cloned()
    }
}

/// A store that never holds anything. Combined with the env-var lookup in
/// `resolve`, this models deployments with no platform keychain wired up.
pub struct EmptySecretStore;

impl SecretStore for EmptySecretStore {
    fn get(&self, _name: &str) -> Option<SecretString> {
        None
    }
}
