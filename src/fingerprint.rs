//! Deterministic fingerprinting of an upstream specification (§4.2).
//!
//! Any semantic change to a spec — command, args order, env keys/values,
//! headers, url, cwd — must change the fingerprint; two specs with the
//! same fingerprint must be treated as identical. Canonical serialization
//! (sorted map keys) into a SHA-256 digest satisfies this without betting
//! on a non-cryptographic hash's collision behavior.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::UpstreamSpec;

/// A stable string derived from one upstream's specification. Used only
/// as a cache key by the stdio pool (§3, "Spec fingerprint").
pub type Fingerprint = String;

/// Computes the fingerprint of `spec`.
pub fn fingerprint(spec: &UpstreamSpec) -> Fingerprint {
    let canonical = canonicalize(spec);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Renders `spec` into a canonical JSON string: object keys sorted via an
/// intermediate `BTreeMap`, so two specs that are semantically identical
/// always produce byte-identical output regardless of source field order.
fn canonicalize(spec: &UpstreamSpec) -> String {
    let value = match spec {
        UpstreamSpec::Http { url, headers } => {
            let mut map = BTreeMap::new();
            map.insert("transport", serde_json::json!("http"));
            map.insert("url", serde_json::json!(url));
            let sorted_headers: BTreeMap<&str, &str> =
                headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            map.insert("headers", serde_json::json!(sorted_headers));
            map
        }
        UpstreamSpec::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            let mut map = BTreeMap::new();
            map.insert("transport", serde_json::json!("stdio"));
            map.insert("command", serde_json::json!(command));
            map.insert("args", serde_json::json!(args));
            let sorted_env: BTreeMap<&str, &str> =
                env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            map.insert("env", serde_json::json!(sorted_env));
            map.insert("cwd", serde_json::json!(cwd));
            map
        }
    };
    // BTreeMap<&str, Value> serializes with keys in sorted order.
    serde_json::to_string(&value).expect("canonical map of JSON values always serializes")
}
