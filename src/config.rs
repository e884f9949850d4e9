//! The configuration snapshot: upstream specifications and gateway settings.
//!
//! This module owns the *typed* data model only. Reading config files,
//! watching for changes, and validating operator input are the job of the
//! out-of-scope config module; here we only define the shape the core
//! consumes and the `ConfigSource` seam that lets the core ask for a fresh
//! snapshot on every request without caching it itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One upstream's connection specification.
///
/// Header and env values may be literal strings or `secret://name`
/// references, resolved lazily at call time (see [`crate::secrets`]).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum UpstreamSpec {
    Http {
        url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: IndexMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
}

impl UpstreamSpec {
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio { .. })
    }

    /// Base URL, for HTTP upstreams only. Used by the OAuth passthrough to
    /// compute well-known endpoint URLs.
    pub fn http_url(&self) -> Option<&str> {
        match self {
            Self::Http { url, .. } => Some(url),
            Self::Stdio { .. } => None,
        }
    }
}

/// Gateway-wide settings carried alongside the upstream map.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySettings {
    pub gateway_port: u16,
    /// A value that may itself be `secret://name`; resolved once per
    /// request to obtain the token local clients must present.
    pub local_token_ref: String,
}

/// One upstream, named and specified — the unit the pool, router, and
/// merger all operate on.
#[derive(Clone, Debug)]
pub struct NamedUpstream {
    pub name: String,
    pub spec: UpstreamSpec,
}

/// A consistent view of the configuration at one moment: every upstream
/// name unique, matching `[A-Za-z0-9][A-Za-z0-9._-]{0,62}`.
///
/// Order is significant — it is the configuration order used for catalog
/// merge ordering (spec §5's "items from upstream A precede items from
/// upstream B iff the configuration lists A before B").
#[derive(Clone, Debug)]
pub struct ConfigSnapshot {
    pub gateway: GatewaySettings,
    servers: IndexMap<String, UpstreamSpec>,
}

impl ConfigSnapshot {
    pub fn new(gateway: GatewaySettings, servers: IndexMap<String, UpstreamSpec>) -> Self {
        Self { gateway, servers }
    }

    pub fn get(&self, name: &str) -> Option<&UpstreamSpec> {
        self.servers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The single configured upstream's name, if there is exactly one.
    /// Drives "flat mode" per spec §3/§4.6/§4.7.
    pub fn sole_upstream(&self) -> Option<&str> {
        if self.servers.len() == 1 {
            self.servers.keys().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Upstreams in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UpstreamSpec)> {
        self.servers.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Validates an upstream name against the spec's naming rule.
pub fn is_valid_upstream_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    if name.len() > 63 {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Source of configuration snapshots.
///
/// The core calls `snapshot()` fresh at the start of every request's
/// dispatch and never caches the result across requests (§9): "the
/// gateway must not cache the snapshot across requests." Implementations
/// MAY memoize internally (e.g. mtime-gated file re-read) — that's the
/// out-of-scope config module's business.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> ConfigSnapshot;
}

/// A `ConfigSource` that always returns a fixed snapshot. Used by the
/// bootstrap binary for a static file and throughout the test suite.
pub struct StaticConfigSource {
    snapshot: parking_lot::RwLock<ConfigSnapshot>,
}

impl StaticConfigSource {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: parking_lot::RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot in place. Used by tests exercising the
    /// "dynamic visibility" property (spec §8 scenario 1): add/remove an
    /// upstream and observe the next `tools/list` reflect it without a
    /// restart.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

impl ConfigSource for StaticConfigSource {
    fn snapshot(&self) -> ConfigSnapshot {
        self.snapshot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_spec(url: &str) -> UpstreamSpec {
        UpstreamSpec::Http {
            url: url.to_string(),
            headers: IndexMap::new(),
        }
    }

    #[test]
    fn sole_upstream_only_when_exactly_one() {
        let mut servers = IndexMap::new();
        servers.insert("vercel".to_string(), http_spec("https://v.example/mcp"));
        let snap = ConfigSnapshot::new(
            GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://local_token".to_string(),
            },
            servers,
        );
        assert_eq!(snap.sole_upstream(), Some("vercel"));

        let mut servers = IndexMap::new();
        servers.insert("a".to_string(), http_spec("https://a.example/mcp"));
        servers.insert("b".to_string(), http_spec("https://b.example/mcp"));
        let snap = ConfigSnapshot::new(
            GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://local_token".to_string(),
            },
            servers,
        );
        assert_eq!(snap.sole_upstream(), None);
    }

    #[test]
    fn iteration_preserves_configuration_order() {
        let mut servers = IndexMap::new();
        servers.insert("circleback".to_string(), http_spec("https://c.example/mcp"));
        servers.insert("vercel".to_string(), http_spec("https://v.example/mcp"));
        let snap = ConfigSnapshot::new(
            GatewaySettings {
                gateway_port: 4890,
                local_token_ref: "secret://local_token".to_string(),
            },
            servers,
        );
        let names: Vec<&str> = snap.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["circleback", "vercel"]);
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_upstream_name("vercel"));
        assert!(is_valid_upstream_name("next_devtools.v2"));
        assert!(!is_valid_upstream_name(""));
        assert!(!is_valid_upstream_name(".leading-dot"));
        assert!(!is_valid_upstream_name(&"a".repeat(64)));
    }
}
