use chrono::Utc;
use tracing::info;

use crate::db::models::{AdminApiConfig, AdminApiConfigRow};
use crate::db::operations::DbOperations;
use crate::error::AppError;
use crate::proxy::ApiKeyCipher;
use crate::Result;

/// Singleton upstream configuration. Nothing is cached: every read goes to
/// the database so a change is visible to the very next send.
pub struct AdminConfigStore {
    db: DbOperations,
    cipher: ApiKeyCipher,
}

impl AdminConfigStore {
    pub fn new(db: DbOperations, cipher: ApiKeyCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn get(&self) -> Result<Option<AdminApiConfig>> {
        let Some(row) = self.db.get_admin_config().await? else {
            return Ok(None);
        };

        let api_key = match row.api_key_encrypted.as_deref() {
            Some(sealed) => Some(self.cipher.open(sealed)?),
            None => None,
        };

        Ok(Some(AdminApiConfig {
            api_key,
            selected_model: row.selected_model,
            rate_limit: row.rate_limit,
            max_tokens: row.max_tokens,
            temperature: row.temperature,
        }))
    }

    /// Replaces the whole configuration.
    pub async fn set(&self, config: &AdminApiConfig) -> Result<()> {
        validate(config)?;

        let api_key_encrypted = match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Some(self.cipher.seal(key)?),
            _ => None,
        };

        self.db
            .put_admin_config(&AdminApiConfigRow {
                api_key_encrypted,
                selected_model: config.selected_model.trim().to_string(),
                rate_limit: config.rate_limit,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                updated_at: Utc::now(),
            })
            .await?;

        info!(
            "Admin API config updated (model: {}, has_key: {})",
            config.selected_model,
            config.has_credential()
        );
        Ok(())
    }
}

fn validate(config: &AdminApiConfig) -> Result<()> {
    if config.selected_model.trim().is_empty() {
        return Err(AppError::ValidationError("selected_model must not be empty".into()));
    }
    if config.rate_limit < 0 {
        return Err(AppError::ValidationError("rate_limit must not be negative".into()));
    }
    if config.max_tokens <= 0 {
        return Err(AppError::ValidationError("max_tokens must be positive".into()));
    }
    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(AppError::ValidationError("temperature must be between 0 and 2".into()));
    }
    Ok(())
}
