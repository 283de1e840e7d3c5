//! Request extractors resolving who is calling.

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use crate::db::models::{Owner, User};
use crate::error::{AppError, AuthError};
use crate::AppState;

/// Header carrying the device identifier of an unauthenticated visitor.
pub const GUEST_ID_HEADER: &str = "X-Guest-Id";

const MAX_GUEST_ID_LEN: usize = 64;

pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn guest_id(req: &HttpRequest) -> Result<Option<String>, AppError> {
    let Some(value) = req.headers().get(GUEST_ID_HEADER) else {
        return Ok(None);
    };
    let id = value
        .to_str()
        .map_err(|_| AppError::ValidationError("guest id must be ASCII".into()))?
        .trim();
    if id.is_empty() || id.len() > MAX_GUEST_ID_LEN {
        return Err(AppError::ValidationError(format!(
            "guest id must be 1-{} characters",
            MAX_GUEST_ID_LEN
        )));
    }
    Ok(Some(id.to_string()))
}

fn app_state(req: &HttpRequest) -> Result<web::Data<AppState>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::InternalError("application state not configured".into()))
}

/// A logged-in user, resolved from a bearer token.
pub struct AuthenticatedUser {
    pub user: User,
    pub token: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state?;
            let token = token.ok_or(AuthError::MissingCredentials)?;
            let user = state.auth_service.validate_token(&token).await?;
            Ok(AuthenticatedUser { user, token })
        })
    }
}

/// Either a logged-in user or a guest device. A bearer token, when present,
/// must be valid; it is never silently downgraded to guest access.
pub enum Caller {
    User(User),
    Guest(String),
}

impl Caller {
    pub fn owner(&self) -> Owner {
        match self {
            Caller::User(user) => Owner::User(user.id),
            Caller::Guest(id) => Owner::Guest(id.clone()),
        }
    }
}

impl FromRequest for Caller {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);
        let guest = guest_id(req);

        Box::pin(async move {
            let state = state?;
            if let Some(token) = token {
                let user = state.auth_service.validate_token(&token).await?;
                return Ok(Caller::User(user));
            }
            match guest? {
                Some(id) => Ok(Caller::Guest(id)),
                None => Err(AuthError::MissingCredentials.into()),
            }
        })
    }
}

/// Holder of a valid admin token.
pub struct AdminSession;

impl FromRequest for AdminSession {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state?;
            let token = token.ok_or(AuthError::MissingCredentials)?;
            state.auth_service.validate_admin_token(&token)?;
            Ok(AdminSession)
        })
    }
}
