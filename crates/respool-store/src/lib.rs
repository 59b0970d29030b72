#![forbid(unsafe_code)]
//! respool-store: the collaborators the controller talks to.
//!
//! - `traits`: async store, namespace-selection, mirror and notification seams.
//! - `retry`: bounded exponential backoff around optimistic-concurrency writes.
//! - `memory`: a complete in-process implementation of every trait.
//! - `world`: YAML snapshot of a cluster-like world, loadable into `MemoryStore`.

pub mod error;
pub mod memory;
pub mod notify;
pub mod retry;
pub mod traits;
pub mod world;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use notify::{Event, EventType, TracingNotifier};
pub use retry::{retry_on_conflict, RetryConfig};
pub use traits::{ClaimStore, MirrorSink, NamespaceSelector, NotificationSink, PoolStore};
pub use world::World;
