//! Circulation policy settings: file defaults with stored overrides

use validator::Validate;

use crate::{error::AppResult, repository::settings::SettingsRepository};

use super::policy::{CirculationPolicy, PolicyHandle, UpdateCirculationPolicy};

#[derive(Clone)]
pub struct SettingsService {
    /// `None` for the in-process backend; updates then live in memory only
    repository: Option<SettingsRepository>,
    policy: PolicyHandle,
}

impl SettingsService {
    pub fn new(repository: Option<SettingsRepository>, policy: PolicyHandle) -> Self {
        Self { repository, policy }
    }

    /// Layer stored overrides on top of the configured policy
    pub async fn load(&self) -> AppResult<CirculationPolicy> {
        let mut policy = self.policy.snapshot();
        if let Some(repository) = &self.repository {
            let stored = repository.get_all().await?;
            policy.apply_overrides(&stored)?;
            policy.validate()?;
            self.policy.replace(policy.clone());
            tracing::info!(overrides = stored.len(), "Circulation policy loaded");
        }
        Ok(policy)
    }

    pub fn get(&self) -> CirculationPolicy {
        self.policy.snapshot()
    }

    /// Apply a partial update. Operations already running keep their snapshot.
    pub async fn update(&self, update: UpdateCirculationPolicy, actor_id: i32) -> AppResult<CirculationPolicy> {
        update.validate()?;
        let next = self.policy.snapshot().updated(&update)?;
        if let Some(repository) = &self.repository {
            repository.upsert_many(&next.to_entries(), actor_id).await?;
        }
        self.policy.replace(next.clone());
        tracing::info!(actor_id, policy = ?next, "Circulation policy updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::{config::CirculationConfig, error::AppError};

    fn service() -> SettingsService {
        SettingsService::new(
            None,
            PolicyHandle::new(CirculationPolicy::from(&CirculationConfig::default())),
        )
    }

    #[tokio::test]
    async fn update_replaces_the_live_policy() {
        let settings = service();
        let updated = settings
            .update(
                UpdateCirculationPolicy {
                    per_day_rate: Some(Decimal::new(2500, 0)),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap();
        assert_eq!(updated.per_day_rate, Decimal::new(2500, 0));
        assert_eq!(settings.get().per_day_rate, Decimal::new(2500, 0));
    }

    #[tokio::test]
    async fn invalid_update_leaves_policy_untouched() {
        let settings = service();
        let err = settings
            .update(
                UpdateCirculationPolicy {
                    max_loans_per_borrower: Some(0),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(settings.get().max_loans_per_borrower, 3);
    }
}
