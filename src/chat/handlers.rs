use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::Caller;
use crate::chat::pipeline::{SendRequest, SendState};
use crate::db::models::ChatSession;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<ChatSession>,
    pub active_session_id: Uuid,
}

pub async fn create_session(
    caller: Caller,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions.create(&caller.owner()).await?;
    Ok(HttpResponse::Created().json(session))
}

pub async fn list_sessions(
    caller: Caller,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let owner = caller.owner();
    // Resolving the active session first guarantees the list is never empty
    let active = state.sessions.active(&owner).await?;
    let sessions = state.sessions.list(&owner).await?;
    Ok(HttpResponse::Ok().json(SessionList {
        sessions,
        active_session_id: active.id,
    }))
}

pub async fn clear_all_sessions(
    caller: Caller,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions.clear_all(&caller.owner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn active_session(
    caller: Caller,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions.active(&caller.owner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn get_session(
    caller: Caller,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions.get(&caller.owner(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn activate_session(
    caller: Caller,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions.switch(&caller.owner(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

pub async fn rename_session(
    caller: Caller,
    path: web::Path<Uuid>,
    req: web::Json<RenameRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state.sessions
        .rename(&caller.owner(), path.into_inner(), &req.title)
        .await?;
    Ok(HttpResponse::Ok().json(session))
}

fn ensure_idle(state: &AppState, session_id: Uuid) -> Result<(), AppError> {
    if state.pipeline.is_typing(session_id) {
        return Err(AppError::Conflict("a reply is still being generated for this session".into()));
    }
    Ok(())
}

/// Returns the session that is active after the deletion.
pub async fn delete_session(
    caller: Caller,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    ensure_idle(&state, session_id)?;
    let active = state.sessions.delete(&caller.owner(), session_id).await?;
    Ok(HttpResponse::Ok().json(active))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
}

pub async fn send_message(
    caller: Caller,
    path: web::Path<Uuid>,
    req: web::Json<SendMessageRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let owner = caller.owner();
    let session_id = path.into_inner();
    let req = req.into_inner();

    let outcome = state.pipeline
        .send(
            &owner,
            session_id,
            SendRequest {
                text: req.text,
                image_url: req.image_url,
                image_data: req.image_data,
            },
        )
        .await?;

    if outcome.state != SendState::Delivered {
        info!("Message from {} in session {} ended {:?}", owner, session_id, outcome.state);
    }
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn clear_messages(
    caller: Caller,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    ensure_idle(&state, session_id)?;
    let session = state.sessions.clear(&caller.owner(), session_id).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn usage(
    caller: Caller,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let usage = state.usage.usage(&caller.owner()).await?;
    Ok(HttpResponse::Ok().json(usage))
}
