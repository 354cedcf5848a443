//! Federated service membership
//!
//! A federated service draws endpoints from one local and zero or more
//! remote clusters. The watcher owns one view per member cluster, all
//! feeding the stream's single dispatcher. Member removal retires the
//! cluster's endpoints (`no_endpoints(true)`) before any view for a
//! newly added cluster can enqueue, so the proxy always sees the
//! Remove first.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::constants::LOCAL_CLUSTER;

use super::address::ServiceKey;
use super::dispatch::StreamDispatcher;
use super::topic::TopicRegistry;
use super::view::{ViewConfig, ViewHandle};

/// Spawn the watcher task for one `Get` stream.
///
/// `membership` carries the current member-cluster set; the watcher
/// reconciles its views against every change until the stream's
/// cancellation token fires or the membership channel closes.
pub fn spawn_federated_watcher(
    dispatcher: StreamDispatcher,
    registry: Arc<TopicRegistry>,
    key: ServiceKey,
    mut membership: watch::Receiver<BTreeSet<String>>,
    config: ViewConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut views: HashMap<String, ViewHandle> = HashMap::new();

        let members = membership.borrow_and_update().clone();
        sync_members(&dispatcher, &registry, &key, &config, &mut views, &members).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = membership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let members = membership.borrow_and_update().clone();
                    tracing::debug!(
                        service = %key,
                        members = ?members,
                        "Federated membership changed"
                    );
                    sync_members(&dispatcher, &registry, &key, &config, &mut views, &members)
                        .await;
                }
            }
        }
    })
}

async fn sync_members(
    dispatcher: &StreamDispatcher,
    registry: &TopicRegistry,
    key: &ServiceKey,
    config: &ViewConfig,
    views: &mut HashMap<String, ViewHandle>,
    members: &BTreeSet<String>,
) {
    // Retire departed clusters first; their Removes must reach the
    // queue before any new cluster's Add.
    let departed: Vec<String> = views
        .keys()
        .filter(|cluster| !members.contains(*cluster))
        .cloned()
        .collect();
    for cluster in departed {
        if let Some(view) = views.remove(&cluster) {
            tracing::debug!(service = %key, %cluster, "Retiring federated member");
            view.no_endpoints(true).await;
            view.close();
        }
    }

    for cluster in members {
        if views.contains_key(cluster) {
            continue;
        }
        let topic = registry.topic(cluster, key);
        let mut view_config = config.clone();
        // Only the local member may report the stream empty; remotes
        // must not clear each other's endpoints.
        view_config.initial_no_endpoints = cluster == LOCAL_CLUSTER;
        match dispatcher.spawn_view(topic, view_config) {
            Ok(view) => {
                tracing::debug!(service = %key, %cluster, "Joining federated member");
                views.insert(cluster.clone(), view);
            }
            Err(error) => {
                tracing::debug!(service = %key, %cluster, %error, "Skipping member view");
                return;
            }
        }
    }
}
