use clap::Parser;

use std::path::PathBuf;

use super::constants::{
    ENV_CLUSTER_DOMAIN, ENV_CONFIG, ENV_CONTROLLER_NAMESPACE, ENV_DEFAULT_OPAQUE_PORTS,
    ENV_ENABLE_ENDPOINT_FILTERING, ENV_ENABLE_H2_UPGRADE, ENV_ENABLE_IPV6,
    ENV_EXT_ENDPOINT_ZONE_WEIGHTS, ENV_FORCE_OPAQUE_TRANSPORT, ENV_HOST,
    ENV_IDENTITY_TRUST_DOMAIN, ENV_PORT, ENV_STREAM_QUEUE_CAPACITY,
    ENV_STREAM_SEND_TIMEOUT_SECS,
};

#[derive(Parser)]
#[command(name = "trellis-destination")]
#[command(version, about = "Trellis destination controller", long_about = None)]
pub struct Cli {
    /// gRPC listen host
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// gRPC listen port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Namespace the control plane runs in
    #[arg(long, env = ENV_CONTROLLER_NAMESPACE)]
    pub controller_namespace: Option<String>,

    /// Trust domain for TLS identities (empty disables identity)
    #[arg(long, env = ENV_IDENTITY_TRUST_DOMAIN)]
    pub identity_trust_domain: Option<String>,

    /// Cluster domain suffix for authority parsing
    #[arg(long, env = ENV_CLUSTER_DOMAIN)]
    pub cluster_domain: Option<String>,

    /// Advertise HTTP/2 upgrade hints for meshed endpoints
    #[arg(long, env = ENV_ENABLE_H2_UPGRADE)]
    pub enable_h2_upgrade: Option<bool>,

    /// Enable topology-aware zone filtering
    #[arg(long, env = ENV_ENABLE_ENDPOINT_FILTERING)]
    pub enable_endpoint_filtering: Option<bool>,

    /// Prefer IPv6 endpoint addresses when both families exist
    #[arg(long, env = ENV_ENABLE_IPV6)]
    pub enable_ipv6: Option<bool>,

    /// Weight same-zone endpoints above the baseline
    #[arg(long, env = ENV_EXT_ENDPOINT_ZONE_WEIGHTS)]
    pub ext_endpoint_zone_weights: Option<bool>,

    /// Advertise opaque transport for every meshed endpoint
    #[arg(long, env = ENV_FORCE_OPAQUE_TRANSPORT)]
    pub force_opaque_transport: Option<bool>,

    /// Default opaque ports, e.g. "25,587,4444-4448"
    #[arg(long, env = ENV_DEFAULT_OPAQUE_PORTS)]
    pub default_opaque_ports: Option<String>,

    /// Seconds a blocked update send may wait before the stream resets
    #[arg(long, env = ENV_STREAM_SEND_TIMEOUT_SECS)]
    pub stream_send_timeout_secs: Option<u64>,

    /// Capacity of the per-stream update queue
    #[arg(long, env = ENV_STREAM_QUEUE_CAPACITY)]
    pub stream_queue_capacity: Option<usize>,
}

/// Plain configuration extracted from the parsed CLI
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub controller_namespace: Option<String>,
    pub identity_trust_domain: Option<String>,
    pub cluster_domain: Option<String>,
    pub enable_h2_upgrade: Option<bool>,
    pub enable_endpoint_filtering: Option<bool>,
    pub enable_ipv6: Option<bool>,
    pub ext_endpoint_zone_weights: Option<bool>,
    pub force_opaque_transport: Option<bool>,
    pub default_opaque_ports: Option<String>,
    pub stream_send_timeout_secs: Option<u64>,
    pub stream_queue_capacity: Option<usize>,
}

/// Parse CLI arguments into a plain config struct
pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        controller_namespace: cli.controller_namespace,
        identity_trust_domain: cli.identity_trust_domain,
        cluster_domain: cli.cluster_domain,
        enable_h2_upgrade: cli.enable_h2_upgrade,
        enable_endpoint_filtering: cli.enable_endpoint_filtering,
        enable_ipv6: cli.enable_ipv6,
        ext_endpoint_zone_weights: cli.ext_endpoint_zone_weights,
        force_opaque_transport: cli.force_opaque_transport,
        default_opaque_ports: cli.default_opaque_ports,
        stream_send_timeout_secs: cli.stream_send_timeout_secs,
        stream_queue_capacity: cli.stream_queue_capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "trellis-destination",
            "--port",
            "9090",
            "--cluster-domain",
            "cluster.example",
            "--enable-ipv6",
            "true",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(9090));
        assert_eq!(cli.cluster_domain.as_deref(), Some("cluster.example"));
        assert_eq!(cli.enable_ipv6, Some(true));
    }

    #[test]
    fn test_cli_defaults_to_none() {
        let cli = Cli::try_parse_from(["trellis-destination"]).unwrap();
        assert!(cli.host.is_none());
        assert!(cli.default_opaque_ports.is_none());
    }
}
