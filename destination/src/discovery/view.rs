//! Per-stream endpoint views
//!
//! An `EndpointView` ties one topic subscription to one dispatcher. Its
//! worker drains the notification channel, pulls the latest snapshot,
//! runs the filter pipeline, diffs against the previous filtered set,
//! and enqueues the resulting Add/Remove updates. The view's mutex
//! serializes snapshot ingestion with external `no_endpoints` calls and
//! is never held while enqueuing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::proto;
use crate::translate::EndpointTranslator;

use super::address::{AddressId, AddressSnapshot, EndpointAddress};
use super::dispatch::{DispatcherShared, StreamDispatcher};
use super::error::DiscoveryError;
use super::filter::{ViewFilter, diff_sets, filter_snapshot};
use super::topic::{EndpointTopic, TopicSubscription};

/// Everything a view needs to turn snapshots into updates.
#[derive(Clone)]
pub struct ViewConfig {
    pub filter: ViewFilter,
    pub translator: EndpointTranslator,
    /// Emit `NoEndpoints { exists: true }` when the first observation
    /// is empty. Set for the stream's primary view only, so federated
    /// members don't clear each other's endpoints.
    pub initial_no_endpoints: bool,
}

#[derive(Default)]
struct ViewState {
    filtered: HashMap<AddressId, EndpointAddress>,
    synced: bool,
}

struct ViewShared {
    state: Mutex<ViewState>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Constructor namespace for views; the handle is the real object.
pub struct EndpointView;

impl EndpointView {
    /// Subscribe to `topic` and spawn the view worker. The worker
    /// primes itself from the topic's current snapshot so a freshly
    /// created view reports existing endpoints without waiting for the
    /// next publish.
    pub(crate) fn spawn(
        topic: Arc<EndpointTopic>,
        dispatcher: StreamDispatcher,
        config: ViewConfig,
    ) -> Result<ViewHandle, DiscoveryError> {
        let subscription = topic.subscribe()?;
        let shared = Arc::new(ViewShared {
            state: Mutex::new(ViewState::default()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        let handle = ViewHandle {
            shared: Arc::clone(&shared),
            dispatcher: dispatcher.downgrade(),
            translator: config.translator.clone(),
            task: Arc::new(Mutex::new(None)),
        };
        let task = tokio::spawn(worker(subscription, dispatcher, config, shared));
        *handle.task.lock() = Some(task);
        Ok(handle)
    }
}

/// Owning handle to a spawned view.
#[derive(Clone)]
pub struct ViewHandle {
    shared: Arc<ViewShared>,
    /// Non-owning back-reference; the dispatcher owns the view.
    dispatcher: Weak<DispatcherShared>,
    translator: EndpointTranslator,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ViewHandle {
    /// Cancel the subscription and stop the worker. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel.cancel();
    }

    /// Wait for the worker to exit; used after `close` where teardown
    /// must be observed.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Force the view to retire everything it currently reports, then
    /// reset its filtered state. Safe to call concurrently with
    /// ordinary notification processing.
    pub async fn no_endpoints(&self, exists: bool) {
        let ids: Vec<AddressId> = {
            let mut state = self.shared.state.lock();
            state.synced = true;
            let mut ids: Vec<AddressId> = state.filtered.drain().map(|(id, _)| id).collect();
            ids.sort();
            ids
        };

        let Some(dispatcher) = self.dispatcher.upgrade().map(StreamDispatcher::from_shared)
        else {
            return;
        };
        let mut updates = Vec::new();
        if !ids.is_empty() {
            updates.push(proto::Update {
                update: Some(proto::update::Update::Remove(
                    self.translator.addr_set(&ids),
                )),
            });
        }
        if !exists {
            updates.push(proto::Update {
                update: Some(proto::update::Update::NoEndpoints(proto::NoEndpoints {
                    exists: false,
                })),
            });
        }
        forward(&dispatcher, updates).await;
    }
}

/// Hand a batch of updates to the dispatcher, resetting the stream on
/// a backpressure timeout. Returns false once the stream has reset.
async fn forward(dispatcher: &StreamDispatcher, updates: Vec<proto::Update>) -> bool {
    for update in updates {
        if let Err(error) = dispatcher.enqueue(update).await {
            tracing::warn!(%error, "Resetting stream");
            dispatcher.reset();
            return false;
        }
    }
    true
}

async fn worker(
    mut subscription: TopicSubscription,
    dispatcher: StreamDispatcher,
    config: ViewConfig,
    shared: Arc<ViewShared>,
) {
    // Prime from the current snapshot before waiting for notifications.
    let updates = ingest(&shared, &config, subscription.latest().as_deref());
    if !forward(&dispatcher, updates).await {
        return;
    }

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            notified = subscription.notified() => match notified {
                // Topic closed; nothing further will arrive.
                None => break,
                Some(()) => {
                    let snapshot = subscription.latest();
                    let updates = ingest(&shared, &config, snapshot.as_deref());
                    if !forward(&dispatcher, updates).await {
                        return;
                    }
                }
            },
        }
    }
}

/// Filter, diff, and translate one observation into protocol updates.
/// The state lock covers only the diff and store; enqueueing happens
/// without it.
fn ingest(
    shared: &ViewShared,
    config: &ViewConfig,
    snapshot: Option<&AddressSnapshot>,
) -> Vec<proto::Update> {
    let filtered = snapshot
        .map(|snapshot| filter_snapshot(snapshot, &config.filter))
        .unwrap_or_default();
    let labels = snapshot
        .map(|snapshot| snapshot.set.labels.clone())
        .unwrap_or_default();

    let (diff, first) = {
        let mut state = shared.state.lock();
        let diff = diff_sets(&state.filtered, &filtered);
        let first = !state.synced;
        state.synced = true;
        state.filtered = filtered;
        (diff, first)
    };

    let mut updates = Vec::new();
    if !diff.add.is_empty() {
        updates.push(proto::Update {
            update: Some(proto::update::Update::Add(
                config.translator.weighted_addr_set(&diff.add, &labels),
            )),
        });
    }
    if !diff.remove.is_empty() {
        updates.push(proto::Update {
            update: Some(proto::update::Update::Remove(
                config.translator.addr_set(&diff.remove),
            )),
        });
    }
    if first && updates.is_empty() && config.initial_no_endpoints {
        updates.push(proto::Update {
            update: Some(proto::update::Update::NoEndpoints(proto::NoEndpoints {
                exists: true,
            })),
        });
    }
    updates
}
