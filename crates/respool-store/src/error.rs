use thiserror::Error;

use respool_core::id::ResourceVersion;
use respool_core::meta::ObjectRef;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectRef),

    #[error("conflict writing {object}: expected {expected}, found {found}")]
    Conflict {
        object: ObjectRef,
        expected: ResourceVersion,
        found: ResourceVersion,
    },

    #[error("{0} already exists")]
    AlreadyExists(ObjectRef),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("mirror sync failed for namespace '{namespace}': {reason}")]
    Mirror { namespace: String, reason: String },

    #[error(transparent)]
    Core(#[from] respool_core::error::Error),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
