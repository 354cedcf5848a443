//! Proxy context tokens
//!
//! Proxies attach a JSON context to each request:
//! `{"ns":"<client-namespace>","nodeName":"<client-node>"}`. A legacy
//! `ns:<namespace>` form is still accepted. Malformed tokens degrade to
//! an empty context rather than failing the stream.

use serde::Deserialize;

/// Client context supplied by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextToken {
    /// Namespace the client proxy runs in; drives profile-namespace
    /// selection.
    #[serde(default)]
    pub ns: String,
    /// Node the client proxy runs on; drives zone and node-locality
    /// filtering.
    #[serde(default, rename = "nodeName")]
    pub node_name: String,
}

/// Parse a context token, tolerating the legacy `ns:<namespace>` form
/// and malformed input.
pub fn parse_context_token(token: &str) -> ContextToken {
    let token = token.trim();
    if token.is_empty() {
        return ContextToken::default();
    }
    if let Ok(parsed) = serde_json::from_str::<ContextToken>(token) {
        return parsed;
    }
    if let Some(ns) = token.strip_prefix("ns:") {
        return ContextToken {
            ns: ns.to_string(),
            node_name: String::new(),
        };
    }
    tracing::debug!(token, "Ignoring unparseable context token");
    ContextToken::default()
}
