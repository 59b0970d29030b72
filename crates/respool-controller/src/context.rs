//! Shared handles for the reconcilers.

use std::sync::Arc;

use respool_core::config::ControllerConfig;
use respool_store::{
    ClaimStore, MirrorSink, NamespaceSelector, NotificationSink, PoolStore, RetryConfig,
};

use crate::error::{ReconcileError, Result};

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Context {
    pub pools: Arc<dyn PoolStore>,
    pub claims: Arc<dyn ClaimStore>,
    pub namespaces: Arc<dyn NamespaceSelector>,
    pub mirrors: Arc<dyn MirrorSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: ControllerConfig,
    pub retry: RetryConfig,
}

impl Context {
    /// Build from one backend that implements every collaborator.
    pub fn new<S>(backend: Arc<S>, config: ControllerConfig) -> Result<Self>
    where
        S: PoolStore + ClaimStore + NamespaceSelector + MirrorSink + NotificationSink + 'static,
    {
        config
            .validate()
            .map_err(|e| ReconcileError::Config(e.to_string()))?;
        let retry = RetryConfig::from(&config);
        Ok(Self {
            pools: backend.clone(),
            claims: backend.clone(),
            namespaces: backend.clone(),
            mirrors: backend.clone(),
            notifier: backend,
            config,
            retry,
        })
    }

    /// Send events somewhere other than the backend.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }
}
