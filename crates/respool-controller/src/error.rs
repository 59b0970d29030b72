use thiserror::Error;

use respool_store::StoreError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Why a claim cannot be admitted to its pool. Terminal for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("claim does not reference a pool")]
    MissingPool,

    #[error("pool '{0}' not found")]
    PoolNotFound(String),

    #[error("pool '{0}' is being deleted")]
    PoolDeleting(String),

    #[error("namespace '{namespace}' is not selected by pool '{pool}'")]
    NamespaceNotSelected { namespace: String, pool: String },

    #[error("resource '{resource}' is not provided by pool '{pool}'")]
    UnknownResource { resource: String, pool: String },

    #[error("cannot change pool while claim is in use")]
    PoolChangeWhileBound { bound: String, requested: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] respool_core::error::Error),

    #[error("mirror sync for pool '{pool}' failed: {source}")]
    Mirror {
        pool: String,
        #[source]
        source: StoreError,
    },

    #[error("task failed: {0}")]
    Join(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ReconcileError {
    /// Conflicts surface here only after retries ran out.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

impl From<tokio::task::JoinError> for ReconcileError {
    fn from(e: tokio::task::JoinError) -> Self {
        ReconcileError::Join(e.to_string())
    }
}

impl From<tokio::sync::AcquireError> for ReconcileError {
    fn from(e: tokio::sync::AcquireError) -> Self {
        ReconcileError::Join(e.to_string())
    }
}
