#![forbid(unsafe_code)]
//! respool-alloc: pool allocation and usage-coverage reconstruction.
//!
//! Responsibilities:
//! - Walk a pool's claims in priority order and decide bind / queue / exhaust.
//! - Reconstruct the smallest deterministic claim set explaining a usage vector.
//! - Provide cheap verification helpers for debug builds and tests.
//!
//! **No I/O, no async** here. The controller persists what this crate decides.

pub mod allocator;
pub mod coverage;
pub mod verify;

pub use allocator::{allocate, allocate_admitted, apply_decision, AllocationOutcome, Applied, ClaimDecision, Decision};
pub use coverage::{covered_total, select_claims_covering_usage_greedy, CoverageSelection};
