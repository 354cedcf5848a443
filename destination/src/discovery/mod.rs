//! Snapshot-based endpoint discovery
//!
//! The fan-out engine between the informer-facing publishers and the
//! per-stream gRPC senders, in three layers with channels as the only
//! crossings:
//!
//! - `topic` - per-service immutable-snapshot publishers with
//!   coalescing pull-based subscriptions.
//! - `view` - per-stream subscribers that filter the latest snapshot
//!   and diff successive filtered sets into Add/Remove updates.
//! - `dispatch` - per-RPC fan-in of one or more views into a bounded
//!   queue drained by the stream's send loop, with send-timeout
//!   backpressure.
//!
//! `federated` materializes one view per member cluster on a single
//! stream, and `index` holds the informer-fed lookup tables the server
//! facade resolves authorities against.

pub mod address;
pub mod dispatch;
pub mod error;
pub mod federated;
pub mod filter;
pub mod index;
pub mod topic;
pub mod view;

pub use address::{
    AddressId, AddressSet, AddressSnapshot, EndpointAddress, ExternalWorkload, OwnerRef, Pod,
    ServiceKey,
};
pub use dispatch::{StreamCounters, StreamDispatcher, UpdateQueue};
pub use error::DiscoveryError;
pub use federated::spawn_federated_watcher;
pub use filter::{SetDiff, ViewFilter, diff_sets, filter_snapshot};
pub use index::{PodEntry, ServiceEntry, ServiceIndex};
pub use topic::{EndpointTopic, TopicRegistry, TopicSubscription};
pub use view::{EndpointView, ViewConfig, ViewHandle};
