pub mod admin;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod proxy;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use admin::{AdminConfigStore, Reporting};
pub use auth::{AuthService, RateLimiter, RateLimitConfig};
pub use chat::{MessagePipeline, SessionStore, UsageMeter};
pub use db::{DbOperations, User};
pub use proxy::{ApiKeyCipher, CompletionApi, OpenRouterClient};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: DbOperations,
    pub auth_service: Arc<AuthService>,
    pub sessions: Arc<SessionStore>,
    pub usage: Arc<UsageMeter>,
    pub admin_config: Arc<AdminConfigStore>,
    pub reporting: Arc<Reporting>,
    pub rate_limiter: Arc<RateLimiter>,
    pub completion: Arc<dyn CompletionApi>,
    pub pipeline: Arc<MessagePipeline>,
}

impl AppState {
    /// Connects to the configured database, applies migrations and talks to
    /// the configured completion API.
    pub async fn new(config: Settings) -> Result<Self> {
        let completion = OpenRouterClient::new(&config.completion)?;
        Self::with_completion(config, Arc::new(completion)).await
    }

    pub async fn with_completion(config: Settings, completion: Arc<dyn CompletionApi>) -> Result<Self> {
        let db = DbOperations::connect(&config.database).await?;
        db.migrate().await?;

        let cipher = ApiKeyCipher::from_base64_key(&config.security.encryption_key)?;

        let auth_service = Arc::new(AuthService::new(
            db.clone(),
            config.auth.clone(),
            config.admin.clone(),
            config.quota.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let usage = Arc::new(UsageMeter::new(db.clone(), config.quota.clone()));
        let admin_config = Arc::new(AdminConfigStore::new(db.clone(), cipher));
        let reporting = Arc::new(Reporting::new(db.clone(), config.pricing.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let pipeline = Arc::new(MessagePipeline::new(
            db.clone(),
            sessions.clone(),
            usage.clone(),
            admin_config.clone(),
            rate_limiter.clone(),
            completion.clone(),
            config.completion.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            auth_service,
            sessions,
            usage,
            admin_config,
            reporting,
            rate_limiter,
            completion,
            pipeline,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        // Close database connections
        self.db.close().await;
        Ok(())
    }
}

/// Every HTTP route of the service.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use admin::handlers as admin_api;
    use auth::handlers as auth_api;
    use chat::handlers as chat_api;

    cfg.route("/health", web::get().to(health_check))
        .route("/register", web::post().to(auth_api::register))
        .route("/login", web::post().to(auth_api::login))
        .route("/logout", web::post().to(auth_api::logout))
        .service(
            web::resource("/me")
                .route(web::get().to(auth_api::me))
                .route(web::patch().to(auth_api::update_me))
                .route(web::delete().to(auth_api::delete_me)),
        )
        .route("/me/password", web::put().to(auth_api::change_password))
        .route("/me/plan", web::put().to(auth_api::update_plan))
        .route("/me/export", web::get().to(auth_api::export_data))
        .route("/usage", web::get().to(chat_api::usage))
        .service(
            web::scope("/sessions")
                .service(
                    web::resource("")
                        .route(web::post().to(chat_api::create_session))
                        .route(web::get().to(chat_api::list_sessions))
                        .route(web::delete().to(chat_api::clear_all_sessions)),
                )
                .route("/active", web::get().to(chat_api::active_session))
                .service(
                    web::resource("/{id}")
                        .route(web::get().to(chat_api::get_session))
                        .route(web::patch().to(chat_api::rename_session))
                        .route(web::delete().to(chat_api::delete_session)),
                )
                .route("/{id}/activate", web::post().to(chat_api::activate_session))
                .service(
                    web::resource("/{id}/messages")
                        .route(web::post().to(chat_api::send_message))
                        .route(web::delete().to(chat_api::clear_messages)),
                ),
        )
        .service(
            web::scope("/admin")
                .route("/login", web::post().to(admin_api::login))
                .route("/stats", web::get().to(admin_api::stats))
                .service(
                    web::resource("/config")
                        .route(web::get().to(admin_api::get_config))
                        .route(web::put().to(admin_api::put_config)),
                )
                .route("/config/test", web::post().to(admin_api::test_config))
                .route("/users", web::get().to(admin_api::list_users))
                .route("/users/{id}/plan", web::put().to(admin_api::set_user_plan))
                .route("/users/{id}", web::delete().to(admin_api::delete_user))
                .route("/messages", web::get().to(admin_api::recent_messages))
                .route("/usage-logs", web::get().to(admin_api::usage_logs)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cleanup_env() {
        env::remove_var("APP_DATABASE__URL");
    }

    #[tokio::test]
    async fn test_app_state_creation() {
        cleanup_env();
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.expect("Failed to build state");

        assert_eq!(state.db.pool().size(), 1);
        assert_eq!(state.config.environment, "test");
    }

    #[tokio::test]
    async fn test_app_state_rejects_bad_encryption_key() {
        cleanup_env();
        let mut config = Settings::new_for_test().unwrap();
        config.security.encryption_key = "c2hvcnQ=".into();

        let state = AppState::new(config).await;
        assert!(matches!(state, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_app_state_clone() {
        cleanup_env();
        let config = Settings::new_for_test().expect("Failed to load test config");
        let state = AppState::new(config).await.unwrap();

        let cloned = state.clone();

        // Verify Arc references are shared
        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.pipeline, &cloned.pipeline));
        assert!(Arc::ptr_eq(&state.db.pool(), &cloned.db.pool()));
    }
}
