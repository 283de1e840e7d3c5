use std::time::Instant;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::admin::reporting::DEFAULT_ACTIVE_WINDOW_DAYS;
use crate::auth::AdminSession;
use crate::db::models::{AdminApiConfig, Owner, Plan};
use crate::error::{AppError, UpstreamError};
use crate::proxy::CompletionParams;
use crate::AppState;

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;
const DEFAULT_MAX_TOKENS: i64 = 500;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const CONNECTION_TEST_MESSAGE: &str = "नमस्ते";

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    req: web::Json<AdminLoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let token = state.auth_service.authenticate_admin(&req.username, &req.password)?;
    info!("Admin login successful");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub window_days: Option<i64>,
}

pub async fn stats(
    _admin: AdminSession,
    query: web::Query<StatsQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let window = query.window_days.unwrap_or(DEFAULT_ACTIVE_WINDOW_DAYS);
    let stats = state.reporting.stats(window).await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Admin configuration as shown to the dashboard; the credential is masked.
#[derive(Debug, Serialize)]
pub struct MaskedConfig {
    pub configured: bool,
    pub has_api_key: bool,
    pub api_key_preview: Option<String>,
    pub selected_model: String,
    pub rate_limit: i64,
    pub max_tokens: i64,
    pub temperature: f64,
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn default_config(state: &AppState) -> AdminApiConfig {
    AdminApiConfig {
        api_key: None,
        selected_model: state.config.completion.default_model.clone(),
        rate_limit: 0,
        max_tokens: DEFAULT_MAX_TOKENS,
        temperature: DEFAULT_TEMPERATURE,
    }
}

pub async fn get_config(
    _admin: AdminSession,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let stored = state.admin_config.get().await?;
    let configured = stored.is_some();
    let config = stored.unwrap_or_else(|| default_config(&state));

    Ok(HttpResponse::Ok().json(MaskedConfig {
        configured,
        has_api_key: config.has_credential(),
        api_key_preview: config.api_key.as_deref().filter(|k| !k.is_empty()).map(mask_key),
        selected_model: config.selected_model,
        rate_limit: config.rate_limit,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }))
}

/// Distinguishes an absent field from an explicit `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    /// Absent keeps the stored key; `null` or `""` removes it.
    #[serde(default, deserialize_with = "present")]
    pub api_key: Option<Option<String>>,
    pub selected_model: String,
    #[serde(default)]
    pub rate_limit: i64,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
}

impl ConfigRequest {
    fn resolve(self, current: Option<AdminApiConfig>) -> AdminApiConfig {
        let api_key = match self.api_key {
            Some(key) => key.filter(|k| !k.trim().is_empty()),
            None => current.and_then(|c| c.api_key),
        };
        AdminApiConfig {
            api_key,
            selected_model: self.selected_model,
            rate_limit: self.rate_limit,
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        }
    }
}

pub async fn put_config(
    _admin: AdminSession,
    req: web::Json<ConfigRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let current = state.admin_config.get().await?;
    let config = req.into_inner().resolve(current);
    state.admin_config.set(&config).await?;
    get_config(AdminSession, state).await
}

/// Sends `नमस्ते` upstream with the proposed configuration, or the stored
/// one when no body is given.
pub async fn test_config(
    _admin: AdminSession,
    req: Option<web::Json<ConfigRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let current = state.admin_config.get().await?;
    let config = match req {
        Some(req) => req.into_inner().resolve(current),
        None => current.ok_or(UpstreamError::ConfigMissing)?,
    };

    let Some(api_key) = config.api_key.clone().filter(|_| config.has_credential()) else {
        return Err(UpstreamError::ConfigMissing.into());
    };

    let params = CompletionParams {
        api_key,
        model: config.selected_model.clone(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    };

    let started = Instant::now();
    match state.completion.complete(&params, CONNECTION_TEST_MESSAGE).await {
        Ok(reply) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "model": params.model,
            "reply": reply,
            "response_time_ms": started.elapsed().as_millis() as u64,
        }))),
        Err(e) => {
            error!("Admin connection test failed: {}", e);
            Err(e.into())
        }
    }
}

pub async fn list_users(
    _admin: AdminSession,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let users = state.db.list_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub plan: Plan,
}

pub async fn set_user_plan(
    _admin: AdminSession,
    path: web::Path<Uuid>,
    req: web::Json<SetPlanRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth_service.update_plan(path.into_inner(), req.plan).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn delete_user(
    _admin: AdminSession,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    state.auth_service.delete_account(user_id).await?;
    state.sessions.forget(&Owner::User(user_id)).await;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

impl LogQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)
    }
}

pub async fn recent_messages(
    _admin: AdminSession,
    query: web::Query<LogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let messages = state.db.recent_messages(query.limit()).await?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn usage_logs(
    _admin: AdminSession,
    query: web::Query<LogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let logs = state.db.list_usage_logs(query.limit()).await?;
    Ok(HttpResponse::Ok().json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-or-v1-abcdef123456"), "sk-o...3456");
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn test_config_request_key_semantics() {
        let stored = AdminApiConfig {
            api_key: Some("stored".into()),
            selected_model: "m".into(),
            rate_limit: 0,
            max_tokens: 500,
            temperature: 0.7,
        };

        let absent: ConfigRequest = serde_json::from_str(r#"{"selected_model":"x"}"#).unwrap();
        assert_eq!(absent.resolve(Some(stored.clone())).api_key.as_deref(), Some("stored"));

        let cleared: ConfigRequest =
            serde_json::from_str(r#"{"selected_model":"x","api_key":null}"#).unwrap();
        assert_eq!(cleared.resolve(Some(stored.clone())).api_key, None);

        let replaced: ConfigRequest =
            serde_json::from_str(r#"{"selected_model":"x","api_key":"new"}"#).unwrap();
        let resolved = replaced.resolve(Some(stored));
        assert_eq!(resolved.api_key.as_deref(), Some("new"));
        assert_eq!(resolved.max_tokens, DEFAULT_MAX_TOKENS);
    }
}
