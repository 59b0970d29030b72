//! The single total order over claims competing for a pool.
//!
//! `(creation_timestamp, name, namespace)` ascending. Allocation, queueing and
//! coverage reconstruction all sort with this key; nothing else breaks ties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claim::Claim;

/// Field order matters: the derived `Ord` compares top to bottom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    pub created: DateTime<Utc>,
    pub name: String,
    pub namespace: String,
}

impl ClaimKey {
    pub fn new(created: DateTime<Utc>, name: &str, namespace: &str) -> Self {
        Self {
            created,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

pub fn sort_by_priority(claims: &mut [Claim]) {
    claims.sort_by_cached_key(Claim::order_key);
}

pub fn is_priority_ordered(claims: &[Claim]) -> bool {
    claims
        .windows(2)
        .all(|w| w[0].order_key() <= w[1].order_key())
}
