use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use respool_core::quantity::Quantity;
use respool_core::resources::ResourceName;

/// Result type local to respool-ledger.
pub type Result<T> = std::result::Result<T, Error>;

/// One resource a request could not get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub resource: ResourceName,
    pub requested: Quantity,
    pub available: Quantity,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {}: {} vs available {}",
            self.resource, self.requested, self.available
        )
    }
}

pub(crate) fn join_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(Shortfall::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient capacity: {}", join_shortfalls(.0))]
    Insufficient(Vec<Shortfall>),

    #[error("claim {uid} already recorded in namespace '{namespace}'")]
    AlreadyRecorded { namespace: String, uid: String },
}
