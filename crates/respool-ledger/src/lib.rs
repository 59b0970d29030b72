#![forbid(unsafe_code)]
//! respool-ledger: the pool's resource ledger and exhaustion accumulator.
//!
//! The ledger is rebuilt from scratch every allocation cycle; nothing here is
//! incrementally patched across cycles. All capacity checks go through
//! `Ledger::shortfalls`, so the "reject, never admit negative" rule lives in
//! exactly one place.

pub mod error;
pub mod ledger;
pub mod tracking;

pub use error::{Error, Result, Shortfall};
pub use ledger::Ledger;
pub use tracking::{Blocked, ExhaustionTracker};
