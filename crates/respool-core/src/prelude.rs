//! Convenient re-exports for downstream crates.

pub use crate::claim::{Claim, ClaimSpec, ClaimStatus, PoolRef};
pub use crate::condition::{set_condition, Condition, ConditionStatus, ConditionType, Reason};
pub use crate::config::{ConfigOverrides, ControllerConfig};
pub use crate::error::{Error, Result};
pub use crate::hash::Fingerprint;
pub use crate::id::{ResourceVersion, Uid};
pub use crate::meta::{ObjectKind, ObjectMeta, ObjectRef, OwnerKind, OwnerReference};
pub use crate::order::{sort_by_priority, ClaimKey};
pub use crate::pool::{ClaimEntry, Exhaustion, Pool, PoolAllocation, PoolConfig, PoolSpec, PoolStatus};
pub use crate::quantity::Quantity;
pub use crate::resources::{ResourceList, ResourceName};
pub use crate::selector::LabelSelector;
