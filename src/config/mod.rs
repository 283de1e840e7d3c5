use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_hours: i64,
}

/// Back-office login. There is a single admin account.
#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuestReset {
    /// Allowance refills at local midnight.
    Daily,
    /// Allowance never refills for the lifetime of the process.
    Lifetime,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    pub free_limit: i64,
    pub premium_limit: i64,
    pub guest_limit: u32,
    pub guest_reset: GuestReset,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    pub premium_price: i64,
    pub enterprise_price: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub default_model: String,
    pub vision_model: String,
    pub timeout_secs: u64,
    pub app_title: String,
    pub referer: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    pub allowed_origins: Vec<String>,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// Base64 encoded 32 byte key protecting the stored upstream credential.
    pub encryption_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
    pub quota: QuotaConfig,
    pub pricing: PricingConfig,
    pub completion: CompletionConfig,
    pub cors: CorsConfig,
    pub security: SecurityConfig,
}

const DEV_JWT_SECRET: &str = "development_secret";
const DEV_ADMIN_PASSWORD: &str = "admin123";
const DEV_ENCRYPTION_KEY: &str = "dmFhbmktZGV2ZWxvcG1lbnQtZW5jcnlwdGlvbi1rZXk=";

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
    environment: &str,
    database_url: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("database.url", database_url)?
        .set_default("database.max_connections", 5)?
        .set_default("database.acquire_timeout_secs", 5)?
        .set_default("auth.jwt_secret", DEV_JWT_SECRET)?
        .set_default("auth.token_expiry_hours", 24)?
        .set_default("admin.username", "admin")?
        .set_default("admin.password", DEV_ADMIN_PASSWORD)?
        .set_default("quota.free_limit", 100)?
        .set_default("quota.premium_limit", 5000)?
        .set_default("quota.guest_limit", 20)?
        .set_default("quota.guest_reset", "daily")?
        .set_default("pricing.premium_price", 499)?
        .set_default("pricing.enterprise_price", 2999)?
        .set_default("completion.base_url", "https://openrouter.ai/api/v1")?
        .set_default("completion.default_model", "openrouter/sonoma-dusk-alpha")?
        .set_default("completion.vision_model", "openai/gpt-4o-mini")?
        .set_default("completion.timeout_secs", 30)?
        .set_default("completion.app_title", "VaaniAI Hindi Chatbot")?
        .set_default("completion.referer", "http://localhost:8080")?
        .set_default("cors.enabled", true)?
        .set_default("cors.allow_any_origin", false)?
        .set_default("cors.allowed_origins", vec!["http://localhost:5173", "http://127.0.0.1:5173"])?
        .set_default("cors.max_age", 3600)?
        .set_default("security.encryption_key", DEV_ENCRYPTION_KEY)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = with_defaults(Config::builder(), &run_mode, "sqlite://vaani.db?mode=rwc")?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults backed by an in-memory database, without files or environment overrides.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        with_defaults(Config::builder(), "test", "sqlite::memory:")?
            .set_override("auth.jwt_secret", "test_secret")?
            .set_override("auth.token_expiry_hours", 1)?
            .set_override("database.max_connections", 1)?
            .build()?
            .try_deserialize()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.completion.base_url).map_err(|e| {
            ConfigError::Message(format!("completion.base_url is not a valid URL: {}", e))
        })?;
        if self.quota.free_limit < 0 || self.quota.premium_limit < 0 {
            return Err(ConfigError::Message("quota limits must not be negative".into()));
        }
        if self.completion.timeout_secs == 0 {
            return Err(ConfigError::Message("completion.timeout_secs must be positive".into()));
        }
        if !matches!(self.environment.as_str(), "development" | "test") {
            let defaults = [
                ("auth.jwt_secret", self.auth.jwt_secret == DEV_JWT_SECRET),
                ("admin.password", self.admin.password == DEV_ADMIN_PASSWORD),
                ("security.encryption_key", self.security.encryption_key == DEV_ENCRYPTION_KEY),
            ];
            if let Some((key, _)) = defaults.iter().find(|(_, is_default)| *is_default) {
                return Err(ConfigError::Message(format!(
                    "{} must be overridden in the {} environment",
                    key, self.environment
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cleanup_env() {
        env::remove_var("APP_SERVER__PORT");
        env::remove_var("APP_QUOTA__FREE_LIMIT");
        env::remove_var("APP_QUOTA__GUEST_RESET");
    }

    #[test]
    fn test_settings_defaults() {
        cleanup_env();
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.workers as usize, num_cpus::get());
        assert_eq!(settings.database.url, "sqlite::memory:");
        assert_eq!(settings.database.max_connections, 1);
        assert_eq!(settings.quota.free_limit, 100);
        assert_eq!(settings.quota.premium_limit, 5000);
        assert_eq!(settings.quota.guest_limit, 20);
        assert_eq!(settings.quota.guest_reset, GuestReset::Daily);
        assert_eq!(settings.completion.timeout_secs, 30);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_override() {
        cleanup_env();
        env::set_var("APP_SERVER__PORT", "9000");
        env::set_var("APP_QUOTA__FREE_LIMIT", "10");
        env::set_var("APP_QUOTA__GUEST_RESET", "lifetime");

        let settings: Settings = with_defaults(Config::builder(), "test", "sqlite::memory:")
            .unwrap()
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()
            .expect("Failed to build config")
            .try_deserialize()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.quota.free_limit, 10);
        assert_eq!(settings.quota.guest_reset, GuestReset::Lifetime);

        cleanup_env();
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.completion.base_url = "not a url".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("completion.base_url"));
    }

    #[test]
    fn test_development_secrets_refused_in_production() {
        let mut settings = Settings::new_for_test().unwrap();
        settings.environment = "production".into();
        settings.auth.jwt_secret = DEV_JWT_SECRET.into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("auth.jwt_secret"));

        settings.auth.jwt_secret = "a-real-secret".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("admin.password"));

        settings.admin.password = "a-real-password".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("security.encryption_key"));

        settings.security.encryption_key = "cmVhbC1rZXktcmVhbC1rZXktcmVhbC1rZXktcmVhbCE=".into();
        assert!(settings.validate().is_ok());
    }
}
