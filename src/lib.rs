#![forbid(unsafe_code)]
//! respool: multi-tenant resource pools.
//!
//! Facade over the workspace crates, so downstream users need one dependency.

pub use respool_alloc as alloc;
pub use respool_controller as controller;
pub use respool_core as model;
pub use respool_ledger as ledger;
pub use respool_store as store;
