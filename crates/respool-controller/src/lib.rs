#![forbid(unsafe_code)]
//! respool-controller: reconcilers and the controller loop.
//!
//! Level-triggered: every pool cycle recomputes namespaces, claims, exhaustions
//! and claimed totals from the store plus the previous status snapshot.
//! Garbage collection runs before allocation in the same cycle so that freed
//! capacity is visible to that cycle's admissions.

pub mod admission;
pub mod claim;
pub mod context;
pub mod error;
pub mod gc;
pub mod manager;
pub mod metrics;
pub mod pool;

pub use admission::admit;
pub use claim::{ClaimOutcome, ClaimReconciler};
pub use context::Context;
pub use error::{AdmissionError, ReconcileError, Result};
pub use gc::{GarbageCollector, GcReport};
pub use manager::{Controller, PassReport};
pub use pool::{PoolReconciler, PoolReport};
