//! Service profile pipeline
//!
//! Builds the per-stream `GetProfile` chain: a profile source (single,
//! or a primary/backup fallback pair when the proxy's context token
//! names a client namespace), the dst-override and opaque-ports
//! adaptors, dedup, default substitution, and translation to the wire
//! `DestinationProfile`. The endpoint variant emits profiles for
//! authorities naming a single pod.

pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod translator;

use std::collections::BTreeSet;

pub use endpoint::spawn_endpoint_profile_stream;
pub use error::ProfileError;
pub use pipeline::{ProfilePipeline, spawn_profile_stream};
pub use source::{ProfileRegistry, ProfileSource, ProfileState};

/// Routing rules and policy for one service, as decoded from profile
/// resources by the informer layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Profile {
    pub routes: Vec<RouteSpec>,
    pub retry_budget: Option<RetryBudgetSpec>,
    pub dst_overrides: Vec<DstOverride>,
    /// The whole service speaks an opaque protocol.
    pub opaque_protocol: bool,
    /// Ports that should be treated as opaque.
    pub opaque_ports: BTreeSet<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub name: String,
    /// Anchored regular expression over the request path.
    pub path_regex: Option<String>,
    /// HTTP method, uppercase.
    pub method: Option<String>,
    pub is_retryable: bool,
    /// Per-request timeout in milliseconds; zero means unset.
    pub timeout_ms: u64,
    /// Inclusive status range classified as failure.
    pub failure_statuses: Option<(u16, u16)>,
}

impl RouteSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_regex: None,
            method: None,
            is_retryable: false,
            timeout_ms: 0,
            failure_statuses: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBudgetSpec {
    /// Extra load permitted as a fraction of ordinary traffic.
    pub retry_ratio: f32,
    pub min_retries_per_second: u32,
    pub ttl_seconds: u32,
}

impl Default for RetryBudgetSpec {
    fn default() -> Self {
        Self {
            retry_ratio: 0.2,
            min_retries_per_second: 10,
            ttl_seconds: 10,
        }
    }
}

/// A traffic-split target for the service.
#[derive(Debug, Clone, PartialEq)]
pub struct DstOverride {
    pub authority: String,
    pub weight: u32,
}
