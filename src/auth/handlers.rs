use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, error};

use crate::auth::extract::AuthenticatedUser;
use crate::db::models::{ChatSession, Owner, Plan, User};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for email: {}", req.email);
    match state.auth_service.authenticate(&req.email, &req.password).await {
        Ok((token, user)) => {
            info!("Login successful for user: {}", user.id);
            Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
        }
        Err(e) => {
            error!("Login failed for email: {}: {}", req.email, e);
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for email: {}", req.email);

    if let Err(e) = state.auth_service.register(&req.name, &req.email, &req.password).await {
        error!("Registration failed for email: {}: {}", req.email, e);
        return Err(e);
    }

    // Log the new account straight in
    let (token, user) = state.auth_service.authenticate(&req.email, &req.password).await?;
    info!("Post-registration login successful for user: {}", user.id);
    Ok(HttpResponse::Created().json(AuthResponse { token, user }))
}

pub async fn logout(
    caller: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.invalidate_token(&caller.token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Successfully logged out"
    })))
}

pub async fn me(caller: AuthenticatedUser) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(caller.user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

pub async fn update_me(
    caller: AuthenticatedUser,
    req: web::Json<UpdateProfileRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth_service.update_name(caller.user.id, &req.name).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    caller: AuthenticatedUser,
    req: web::Json<ChangePasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service
        .change_password(&caller.user, &req.current_password, &req.new_password)
        .await?;
    info!("Password changed for user {}", caller.user.id);
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: Plan,
}

pub async fn update_plan(
    caller: AuthenticatedUser,
    req: web::Json<UpdatePlanRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth_service.update_plan(caller.user.id, req.plan).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn delete_me(
    caller: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.delete_account(caller.user.id).await?;
    state.sessions.forget(&Owner::User(caller.user.id)).await;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Serialize)]
pub struct DataExport {
    pub profile: User,
    pub sessions: Vec<ChatSession>,
    pub exported_at: chrono::DateTime<Utc>,
    pub version: &'static str,
}

pub async fn export_data(
    caller: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let sessions = state.sessions.list(&Owner::User(caller.user.id)).await?;
    Ok(HttpResponse::Ok().json(DataExport {
        profile: caller.user,
        sessions,
        exported_at: Utc::now(),
        version: "1.0",
    }))
}
