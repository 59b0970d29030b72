#![forbid(unsafe_code)]
//! respool-core: shared data model for the pool allocation engine.
//!
//! Everything here is pure data plus small helpers (parsing, ordering,
//! hashing). No async, no IO. Higher crates (`respool-ledger`,
//! `respool-alloc`, `respool-store`, `respool-controller`) build on it.

pub mod claim;
pub mod condition;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod meta;
pub mod order;
pub mod pool;
pub mod prelude;
pub mod quantity;
pub mod resources;
pub mod selector;

/// Finalizer kept on a pool while it still has bound claims.
pub const POOL_FINALIZER: &str = "respool.io/finalizer";

/// Annotation marking a claim for release from its pool.
pub const RELEASE_ANNOTATION: &str = "respool.io/release";
