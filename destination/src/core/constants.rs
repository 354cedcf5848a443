// =============================================================================
// Application Identity
// =============================================================================

/// Crate name as it appears in log targets
pub const APP_LOG_TARGET: &str = "trellis_destination";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TRELLIS_DESTINATION_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for the gRPC listen host
pub const ENV_HOST: &str = "TRELLIS_DESTINATION_HOST";

/// Environment variable for the gRPC listen port
pub const ENV_PORT: &str = "TRELLIS_DESTINATION_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRELLIS_LOG";

// =============================================================================
// Environment Variables - Mesh
// =============================================================================

pub const ENV_CONTROLLER_NAMESPACE: &str = "TRELLIS_CONTROLLER_NAMESPACE";
pub const ENV_IDENTITY_TRUST_DOMAIN: &str = "TRELLIS_IDENTITY_TRUST_DOMAIN";
pub const ENV_CLUSTER_DOMAIN: &str = "TRELLIS_CLUSTER_DOMAIN";
pub const ENV_ENABLE_H2_UPGRADE: &str = "TRELLIS_ENABLE_H2_UPGRADE";
pub const ENV_ENABLE_ENDPOINT_FILTERING: &str = "TRELLIS_ENABLE_ENDPOINT_FILTERING";
pub const ENV_ENABLE_IPV6: &str = "TRELLIS_ENABLE_IPV6";
pub const ENV_EXT_ENDPOINT_ZONE_WEIGHTS: &str = "TRELLIS_EXT_ENDPOINT_ZONE_WEIGHTS";
pub const ENV_FORCE_OPAQUE_TRANSPORT: &str = "TRELLIS_FORCE_OPAQUE_TRANSPORT";
pub const ENV_DEFAULT_OPAQUE_PORTS: &str = "TRELLIS_DEFAULT_OPAQUE_PORTS";
pub const ENV_STREAM_SEND_TIMEOUT_SECS: &str = "TRELLIS_STREAM_SEND_TIMEOUT_SECS";
pub const ENV_STREAM_QUEUE_CAPACITY: &str = "TRELLIS_STREAM_QUEUE_CAPACITY";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default gRPC listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default gRPC listen port
pub const DEFAULT_PORT: u16 = 8086;

/// Default cluster domain suffix for authority parsing
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Default namespace the control plane runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "trellis";

/// Authority port assumed when the path carries none
pub const DEFAULT_AUTHORITY_PORT: u16 = 80;

// =============================================================================
// Discovery Defaults
// =============================================================================

/// Upper bound on a blocked dispatcher enqueue before the stream resets
pub const DEFAULT_STREAM_SEND_TIMEOUT_SECS: u64 = 5;

/// Capacity of the per-stream update queue
pub const DEFAULT_STREAM_QUEUE_CAPACITY: usize = 8;

/// Capacity of the per-stream endpoint-profile queue
pub const DEFAULT_PROFILE_QUEUE_CAPACITY: usize = 100;

/// Default opaque ports applied when a workload carries no annotation
pub const DEFAULT_OPAQUE_PORTS: &[u16] = &[25, 587, 3306, 4444, 5432, 6379, 9300, 11211];

/// Baseline endpoint weight
pub const BASE_ENDPOINT_WEIGHT: u32 = 10_000;

/// Multiplier applied to same-zone endpoints when zone weighting is on
pub const ZONE_WEIGHT_MULTIPLIER: u32 = 10;

/// Inbound proxy port assumed when a pod does not declare one
pub const DEFAULT_INBOUND_PORT: u16 = 4143;

/// Cluster tag for topics fed by the local cluster's endpoints
pub const LOCAL_CLUSTER: &str = "local";

// =============================================================================
// Identity
// =============================================================================

/// Identity mode under which endpoint TLS identities are advertised
pub const IDENTITY_MODE_DEFAULT: &str = "default";

// =============================================================================
// Metric Label Keys
// =============================================================================

pub const LABEL_SERVICE: &str = "service";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_POD: &str = "pod";
pub const LABEL_SERVICE_ACCOUNT: &str = "serviceaccount";
pub const LABEL_CONTROL_PLANE_NS_METRIC: &str = "control_plane_ns";
pub const LABEL_ZONE: &str = "zone";
pub const LABEL_EXTERNAL_WORKLOAD: &str = "external_workload";
pub const LABEL_OWNER_GROUP: &str = "owner_group";

// =============================================================================
// Shutdown
// =============================================================================

/// Seconds to wait for background tasks before giving up on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
