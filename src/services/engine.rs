//! Shared engine context and the atomic-operation runner

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use rand::Rng;

use crate::{
    error::{AppError, AppResult},
    repository::{CirculationStore, ItemTransaction},
};

use super::{clock::Clock, events::EventBus, policy::EngineTuning, policy::PolicyHandle};

/// Everything a circulation operation needs, cheap to clone
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn CirculationStore>,
    pub clock: Arc<dyn Clock>,
    pub policy: PolicyHandle,
    pub events: EventBus,
    pub tuning: EngineTuning,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn CirculationStore>,
        clock: Arc<dyn Clock>,
        policy: PolicyHandle,
        events: EventBus,
        tuning: EngineTuning,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            events,
            tuning,
        }
    }

    /// Lock `item_id` for the duration of one attempt
    pub async fn begin(&self, item_id: i32) -> AppResult<Box<dyn ItemTransaction>> {
        self.store.begin(item_id, self.tuning.lock_timeout).await
    }

    /// Run one atomic operation, retrying transient failures.
    ///
    /// Every attempt is a fresh transaction. Business rejections and invariant
    /// violations are returned as they are; transient errors are retried with
    /// jittered exponential backoff and become `Unavailable` once the attempts
    /// are spent. A panic inside an attempt is reported as `Unavailable`.
    pub async fn run_atomic<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let attempts = self.tuning.retry_attempts.max(1);
        let mut n = 0;

        loop {
            n += 1;
            let outcome = AssertUnwindSafe(attempt()).catch_unwind().await;

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_transient() => {
                    if matches!(e, AppError::Circulation(_)) {
                        tracing::debug!(op, "Circulation request rejected: {}", e);
                    }
                    return Err(e);
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    tracing::error!(op, "Circulation operation panicked; transaction rolled back");
                    return Err(AppError::Unavailable(format!("{} failed unexpectedly", op)));
                }
            };

            if n >= attempts {
                tracing::warn!(op, attempts = n, "Giving up after transient failures: {}", err);
                return Err(AppError::Unavailable(format!(
                    "{} could not complete, try again later",
                    op
                )));
            }

            let delay = backoff(self.tuning.retry_base_backoff, n);
            tracing::warn!(op, attempt = n, delay_ms = delay.as_millis() as u64, "Retrying after transient failure: {}", err);
            tokio::time::sleep(delay).await;
        }
    }
}

/// `base * 2^(attempt-1)` plus up to one `base` of jitter
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1 << (attempt - 1).min(10));
    let base_ms = base.as_millis() as u64;
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..base_ms)
    };
    exp + Duration::from_millis(jitter)
}
