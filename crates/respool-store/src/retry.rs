//! Bounded retry for optimistic-concurrency writes.
//!
//! Only `StoreError::Conflict` is retried. Every other error, including
//! `NotFound`, returns immediately. The operation is re-run from scratch each
//! attempt, so it must re-read the object it writes.

use std::future::Future;
use std::time::Duration;

use respool_core::config::ControllerConfig;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for RetryConfig {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            max_retries: cfg.conflict_max_retries,
            initial_backoff: Duration::from_millis(cfg.conflict_initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.conflict_max_backoff_ms),
        }
    }
}

impl RetryConfig {
    /// No retries, no sleeping.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub async fn retry_on_conflict<T, F, Fut>(cfg: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < cfg.max_retries => {
                let delay = cfg.backoff(attempt);
                tracing::warn!(what, attempt, ?delay, error = %err, "conflict, retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use respool_core::id::ResourceVersion;
    use respool_core::meta::{ObjectKind, ObjectRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            object: ObjectRef {
                kind: ObjectKind::Pool,
                namespace: None,
                name: "p".into(),
            },
            expected: ResourceVersion::new(1),
            found: ResourceVersion::new(2),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(cfg.backoff(0), Duration::from_millis(10));
        assert_eq!(cfg.backoff(1), Duration::from_millis(20));
        assert_eq!(cfg.backoff(2), Duration::from_millis(40));
        assert_eq!(cfg.backoff(3), Duration::from_millis(50));
        assert_eq!(cfg.backoff(64), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cfg = RetryConfig::default();
        let out = retry_on_conflict(&cfg, "test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let cfg = RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        };
        let err = retry_on_conflict(&cfg, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(conflict())
        })
        .await
        .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let err = retry_on_conflict(&RetryConfig::default(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::Unavailable("down".into()))
        })
        .await
        .unwrap_err();
        assert!(!err.is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
