//! Events emitted by the reconcilers.

use serde::{Deserialize, Serialize};

use respool_core::meta::ObjectRef;

use crate::traits::NotificationSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub subject: ObjectRef,
    pub kind: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, subject: &ObjectRef, kind: EventType, reason: &str, message: &str) {
        match kind {
            EventType::Normal => tracing::info!(subject = %subject, reason, message, "event"),
            EventType::Warning => tracing::warn!(subject = %subject, reason, message, "event"),
        }
    }
}
