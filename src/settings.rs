use std::sync::Arc;

use crate::errors::AppError;
use crate::models::{Identity, UserSettings};
use crate::rbac::Caller;
use crate::store::SettingsStore;

/// Per-identity preferences with the self-or-admin write rule applied.
pub struct UserSettingsService {
    store: Arc<dyn SettingsStore>,
}

impl UserSettingsService {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Stored settings, or the defaults when `identity` never wrote any.
    pub async fn get(&self, identity: &Identity) -> Result<UserSettings, AppError> {
        Ok(self
            .store
            .get_settings(identity)
            .await?
            .unwrap_or_default())
    }

    /// Replace `target`'s settings wholesale.
    pub async fn set(
        &self,
        caller: &Caller,
        target: &Identity,
        settings: UserSettings,
    ) -> Result<(), AppError> {
        caller.require_self_or_admin(target)?;
        self.store.put_settings(target, &settings).await?;
        if &caller.identity == target {
            tracing::info!(identity = %target, "settings updated");
        } else {
            tracing::info!(identity = %target, admin = %caller.identity, "settings updated by admin");
        }
        Ok(())
    }
}
