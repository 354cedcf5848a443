//! Controller configuration
//!
//! Defaults come from `constants`, an optional JSON config file may
//! override them, and CLI flags / environment variables win over both.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::proto;

use super::cli::CliConfig;
use super::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_HOST, DEFAULT_OPAQUE_PORTS,
    DEFAULT_PORT, DEFAULT_PROFILE_QUEUE_CAPACITY, DEFAULT_STREAM_QUEUE_CAPACITY,
    DEFAULT_STREAM_SEND_TIMEOUT_SECS,
};

// =============================================================================
// Server
// =============================================================================

/// gRPC listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// HTTP/2 client parameters
// =============================================================================

/// Serializable mirror of the wire-level HTTP/2 client parameters
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Http2Params {
    pub keep_alive_interval_seconds: Option<u32>,
    pub keep_alive_timeout_seconds: Option<u32>,
    pub keep_alive_while_idle: bool,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,
    pub adaptive_flow_control: bool,
}

impl Http2Params {
    /// Convert to the wire representation attached to meshed endpoints.
    pub fn to_proto(&self) -> proto::Http2ClientParams {
        let keep_alive = match (
            self.keep_alive_interval_seconds,
            self.keep_alive_timeout_seconds,
        ) {
            (None, None) => None,
            (interval, timeout) => Some(proto::http2_client_params::KeepAlive {
                interval_seconds: interval.unwrap_or(0),
                timeout_seconds: timeout.unwrap_or(0),
                while_idle: self.keep_alive_while_idle,
            }),
        };
        let flow_control = if self.adaptive_flow_control
            || self.initial_stream_window_size.is_some()
            || self.initial_connection_window_size.is_some()
        {
            Some(proto::http2_client_params::FlowControl {
                adaptive_flow_control: self.adaptive_flow_control,
                initial_stream_window_size: self.initial_stream_window_size.unwrap_or(0),
                initial_connection_window_size: self.initial_connection_window_size.unwrap_or(0),
            })
        } else {
            None
        };
        proto::Http2ClientParams {
            flow_control,
            keep_alive,
        }
    }

    fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// App Config
// =============================================================================

/// Complete runtime configuration for the destination controller
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Namespace this control plane runs in; gates TLS identity.
    pub controller_namespace: String,
    /// Enables TLS identity on endpoints when non-empty.
    pub identity_trust_domain: Option<String>,
    /// Suffix accepted by the authority parser.
    pub cluster_domain: String,
    pub enable_h2_upgrade: bool,
    /// Master switch for topology-aware zone filtering.
    pub enable_endpoint_filtering: bool,
    pub enable_ipv6: bool,
    /// Multiplies same-zone endpoint weights by 10.
    pub ext_endpoint_zone_weights: bool,
    pub force_opaque_transport: bool,
    pub default_opaque_ports: BTreeSet<u16>,
    /// HTTP/2 settings advertised for meshed endpoints, if any.
    pub meshed_http2_params: Option<Http2Params>,
    /// Upper bound on a blocked update enqueue before the stream resets.
    pub stream_send_timeout: Duration,
    pub stream_queue_capacity: usize,
    pub profile_queue_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            identity_trust_domain: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            enable_h2_upgrade: true,
            enable_endpoint_filtering: true,
            enable_ipv6: false,
            ext_endpoint_zone_weights: false,
            force_opaque_transport: false,
            default_opaque_ports: DEFAULT_OPAQUE_PORTS.iter().copied().collect(),
            meshed_http2_params: None,
            stream_send_timeout: Duration::from_secs(DEFAULT_STREAM_SEND_TIMEOUT_SECS),
            stream_queue_capacity: DEFAULT_STREAM_QUEUE_CAPACITY,
            profile_queue_capacity: DEFAULT_PROFILE_QUEUE_CAPACITY,
        }
    }
}

/// On-disk layout of the optional JSON config file; every field optional
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    controller_namespace: Option<String>,
    identity_trust_domain: Option<String>,
    cluster_domain: Option<String>,
    enable_h2_upgrade: Option<bool>,
    enable_endpoint_filtering: Option<bool>,
    enable_ipv6: Option<bool>,
    ext_endpoint_zone_weights: Option<bool>,
    force_opaque_transport: Option<bool>,
    default_opaque_ports: Option<String>,
    meshed_http2_params: Http2Params,
    stream_send_timeout_seconds: Option<u64>,
    stream_queue_capacity: Option<usize>,
    profile_queue_capacity: Option<usize>,
}

impl AppConfig {
    /// Resolve the effective configuration from defaults, the optional
    /// config file, and CLI/env overrides (strongest last).
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = &cli.config {
            config.apply_file(path)?;
        }

        config.apply_cli(cli)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file: FileConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(host) = file.host {
            self.server.host = host;
        }
        if let Some(port) = file.port {
            self.server.port = port;
        }
        if let Some(ns) = file.controller_namespace {
            self.controller_namespace = ns;
        }
        if let Some(domain) = file.identity_trust_domain {
            self.identity_trust_domain = non_empty(domain);
        }
        if let Some(domain) = file.cluster_domain {
            self.cluster_domain = domain;
        }
        if let Some(v) = file.enable_h2_upgrade {
            self.enable_h2_upgrade = v;
        }
        if let Some(v) = file.enable_endpoint_filtering {
            self.enable_endpoint_filtering = v;
        }
        if let Some(v) = file.enable_ipv6 {
            self.enable_ipv6 = v;
        }
        if let Some(v) = file.ext_endpoint_zone_weights {
            self.ext_endpoint_zone_weights = v;
        }
        if let Some(v) = file.force_opaque_transport {
            self.force_opaque_transport = v;
        }
        if let Some(ports) = file.default_opaque_ports {
            self.default_opaque_ports = parse_port_set(&ports)?;
        }
        if !file.meshed_http2_params.is_unset() {
            self.meshed_http2_params = Some(file.meshed_http2_params);
        }
        if let Some(secs) = file.stream_send_timeout_seconds {
            self.stream_send_timeout = Duration::from_secs(secs);
        }
        if let Some(cap) = file.stream_queue_capacity {
            self.stream_queue_capacity = cap;
        }
        if let Some(cap) = file.profile_queue_capacity {
            self.profile_queue_capacity = cap;
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliConfig) -> Result<()> {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ns) = &cli.controller_namespace {
            self.controller_namespace = ns.clone();
        }
        if let Some(domain) = &cli.identity_trust_domain {
            self.identity_trust_domain = non_empty(domain.clone());
        }
        if let Some(domain) = &cli.cluster_domain {
            self.cluster_domain = domain.clone();
        }
        if let Some(v) = cli.enable_h2_upgrade {
            self.enable_h2_upgrade = v;
        }
        if let Some(v) = cli.enable_endpoint_filtering {
            self.enable_endpoint_filtering = v;
        }
        if let Some(v) = cli.enable_ipv6 {
            self.enable_ipv6 = v;
        }
        if let Some(v) = cli.ext_endpoint_zone_weights {
            self.ext_endpoint_zone_weights = v;
        }
        if let Some(v) = cli.force_opaque_transport {
            self.force_opaque_transport = v;
        }
        if let Some(ports) = &cli.default_opaque_ports {
            self.default_opaque_ports = parse_port_set(ports)?;
        }
        if let Some(secs) = cli.stream_send_timeout_secs {
            self.stream_send_timeout = Duration::from_secs(secs);
        }
        if let Some(cap) = cli.stream_queue_capacity {
            self.stream_queue_capacity = cap;
        }
        Ok(())
    }

    /// Wire-level HTTP/2 parameters, when configured.
    pub fn meshed_http2(&self) -> Option<proto::Http2ClientParams> {
        self.meshed_http2_params.as_ref().map(Http2Params::to_proto)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Parse a port set of the form `"25,587,4444-4448"`.
pub fn parse_port_set(raw: &str) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid port range start: {part}"))?;
                let hi: u16 = hi
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid port range end: {part}"))?;
                anyhow::ensure!(lo <= hi, "Port range is inverted: {part}");
                ports.extend(lo..=hi);
            }
            None => {
                let port: u16 = part
                    .parse()
                    .with_context(|| format!("Invalid port: {part}"))?;
                ports.insert(port);
            }
        }
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_set_single_and_list() {
        let ports = parse_port_set("25").unwrap();
        assert!(ports.contains(&25));
        assert_eq!(ports.len(), 1);

        let ports = parse_port_set("25, 587,3306").unwrap();
        assert_eq!(ports.len(), 3);
        assert!(ports.contains(&587));
    }

    #[test]
    fn test_parse_port_set_range() {
        let ports = parse_port_set("4444-4448,9300").unwrap();
        assert_eq!(ports.len(), 6);
        assert!(ports.contains(&4446));
        assert!(ports.contains(&9300));
    }

    #[test]
    fn test_parse_port_set_rejects_garbage() {
        assert!(parse_port_set("http").is_err());
        assert!(parse_port_set("90-80").is_err());
    }

    #[test]
    fn test_parse_port_set_empty() {
        assert!(parse_port_set("").unwrap().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.cluster_domain, "cluster.local");
        assert!(config.enable_h2_upgrade);
        assert!(config.identity_trust_domain.is_none());
        assert!(config.default_opaque_ports.contains(&3306));
    }

    #[test]
    fn test_http2_params_to_proto() {
        let params = Http2Params {
            keep_alive_interval_seconds: Some(10),
            keep_alive_timeout_seconds: Some(3),
            keep_alive_while_idle: true,
            ..Default::default()
        };
        let wire = params.to_proto();
        let keep_alive = wire.keep_alive.unwrap();
        assert_eq!(keep_alive.interval_seconds, 10);
        assert_eq!(keep_alive.timeout_seconds, 3);
        assert!(keep_alive.while_idle);
        assert!(wire.flow_control.is_none());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = std::env::temp_dir().join("trellis-dest-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("destination.json");
        std::fs::write(
            &path,
            r#"{"port": 9000, "clusterDomain": "example.org", "defaultOpaquePorts": "443"}"#,
        )
        .unwrap();

        let cli = CliConfig {
            config: Some(path.clone()),
            port: Some(9010),
            ..Default::default()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.server.port, 9010);
        assert_eq!(config.cluster_domain, "example.org");
        assert_eq!(config.default_opaque_ports.len(), 1);

        std::fs::remove_file(path).ok();
    }
}
