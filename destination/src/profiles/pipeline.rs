//! Per-stream profile pipeline
//!
//! Chains the profile stages for one `GetProfile` RPC:
//! source → dst-override qualification → opaque-port merge → default
//! substitution → dedup → wire translation. The driver task feeds a
//! bounded channel whose receiver backs the gRPC response stream.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::proto;

use super::error::ProfileError;
use super::source::{ProfileSource, ProfileState};
use super::{Profile, RetryBudgetSpec, translator};

/// Static inputs of one stream's profile pipeline.
#[derive(Debug, Clone)]
pub struct ProfilePipeline {
    /// Fully qualified service name, without port.
    pub fqn: String,
    pub port: u16,
    pub namespace: String,
    pub cluster_domain: String,
    /// Controller-wide default opaque ports.
    pub default_opaque_ports: BTreeSet<u16>,
    /// Opaque-port annotation on the service or namespace, when set.
    pub annotated_opaque_ports: Option<BTreeSet<u16>>,
}

impl ProfilePipeline {
    /// Baseline substituted when no profile resource exists.
    pub fn default_profile(&self) -> Profile {
        Profile {
            retry_budget: Some(RetryBudgetSpec::default()),
            ..Default::default()
        }
    }

    /// Run the non-source stages over one observed state.
    pub fn translate(&self, state: &ProfileState) -> proto::DestinationProfile {
        let mut profile = match state {
            ProfileState::Present(profile) => (**profile).clone(),
            // Default substitution; `Pending` never reaches here.
            _ => self.default_profile(),
        };
        self.qualify_dst_overrides(&mut profile);
        self.merge_opaque_ports(&mut profile);
        translator::to_proto(&profile, &self.fqn, self.port)
    }

    /// Expand bare service names in dst overrides into fully qualified
    /// authorities on this pipeline's port.
    fn qualify_dst_overrides(&self, profile: &mut Profile) {
        for dst in &mut profile.dst_overrides {
            if !dst.authority.contains('.') {
                dst.authority = format!(
                    "{}.{}.svc.{}:{}",
                    dst.authority, self.namespace, self.cluster_domain, self.port
                );
            }
        }
    }

    /// Merge the effective opaque-port set into the profile: the
    /// service annotation when present, else the configured defaults.
    fn merge_opaque_ports(&self, profile: &mut Profile) {
        let effective = self
            .annotated_opaque_ports
            .as_ref()
            .unwrap_or(&self.default_opaque_ports);
        profile.opaque_ports.extend(effective.iter().copied());
    }
}

/// Spawn the driver task for one `GetProfile` stream and hand back the
/// channel the gRPC layer streams from. Successive equal profiles are
/// suppressed.
pub fn spawn_profile_stream(
    source: ProfileSource,
    pipeline: ProfilePipeline,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<Result<proto::DestinationProfile, tonic::Status>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        if let Err(error) = drive(source, pipeline, tx, cancel).await {
            tracing::debug!(%error, "Profile stream ended");
        }
    });
    rx
}

/// Run the pipeline until the source ends, the stream cancels, or the
/// subscriber goes away.
async fn drive(
    mut source: ProfileSource,
    pipeline: ProfilePipeline,
    tx: mpsc::Sender<Result<proto::DestinationProfile, tonic::Status>>,
    cancel: CancellationToken,
) -> Result<(), ProfileError> {
    let mut last: Option<proto::DestinationProfile> = None;
    loop {
        let state = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            state = source.next() => state,
        };
        let Some(state) = state else {
            return Ok(());
        };
        let message = pipeline.translate(&state);
        if last.as_ref() == Some(&message) {
            continue;
        }
        last = Some(message.clone());
        tx.send(Ok(message))
            .await
            .map_err(|_| ProfileError::StreamClosed)?;
    }
}
