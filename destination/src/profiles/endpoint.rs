//! Endpoint profiles
//!
//! `GetProfile` for an authority naming a single pod (pod IP or pod
//! DNS name) emits profiles that embed the endpoint's `WeightedAddr`
//! and track the pod's opaque-protocol state as Server resources and
//! annotations change. The stream has its own bounded queue; overflow
//! resets the stream instead of blocking the watch.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::discovery::address::EndpointAddress;
use crate::discovery::dispatch::StreamCounters;
use crate::discovery::index::PodEntry;
use crate::proto;
use crate::translate::EndpointTranslator;

use super::RetryBudgetSpec;
use super::error::ProfileError;

/// Spawn the endpoint-profile worker for one stream and hand back the
/// channel the gRPC layer streams from. A queue overflow resets the
/// stream; a departed subscriber just ends it.
pub fn spawn_endpoint_profile_stream(
    pod_rx: watch::Receiver<PodEntry>,
    port: u16,
    fqn: String,
    translator: EndpointTranslator,
    capacity: usize,
    counters: Arc<StreamCounters>,
    cancel: CancellationToken,
) -> mpsc::Receiver<Result<proto::DestinationProfile, tonic::Status>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        match watch_pod(pod_rx, port, &fqn, &translator, &tx, &cancel).await {
            Ok(()) | Err(ProfileError::StreamClosed) => {}
            Err(error @ ProfileError::QueueOverflow) => {
                counters.profile_overflows.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(authority = %fqn, %error, "Resetting endpoint profile stream");
                cancel.cancel();
            }
        }
    });
    rx
}

/// Watch the pod and publish a profile for every observable change.
/// Publishing never blocks; a full queue surfaces as `QueueOverflow`.
async fn watch_pod(
    mut pod_rx: watch::Receiver<PodEntry>,
    port: u16,
    fqn: &str,
    translator: &EndpointTranslator,
    tx: &mpsc::Sender<Result<proto::DestinationProfile, tonic::Status>>,
    cancel: &CancellationToken,
) -> Result<(), ProfileError> {
    let mut last: Option<proto::DestinationProfile> = None;
    loop {
        let entry = pod_rx.borrow_and_update().clone();
        let message = endpoint_profile(&entry, port, fqn, translator);

        if last.as_ref() != Some(&message) {
            last = Some(message.clone());
            match tx.try_send(Ok(message)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(ProfileError::QueueOverflow);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(ProfileError::StreamClosed);
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            changed = pod_rx.changed() => {
                // Pod deleted; the stream ends.
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

fn endpoint_profile(
    entry: &PodEntry,
    port: u16,
    fqn: &str,
    translator: &EndpointTranslator,
) -> proto::DestinationProfile {
    let mut address = EndpointAddress::new(entry.ip, port);
    address.pod = Some(Arc::clone(&entry.pod));

    let opaque = translator.is_opaque(&address);
    let weighted = translator.weighted_addr(&address);
    let budget = RetryBudgetSpec::default();
    proto::DestinationProfile {
        fully_qualified_name: fqn.to_string(),
        opaque_protocol: opaque,
        routes: Vec::new(),
        retry_budget: Some(proto::RetryBudget {
            retry_ratio: budget.retry_ratio,
            min_retries_per_second: budget.min_retries_per_second,
            ttl_seconds: budget.ttl_seconds,
        }),
        dst_overrides: Vec::new(),
        endpoint: Some(weighted),
    }
}
