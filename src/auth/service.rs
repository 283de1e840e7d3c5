use crate::auth::password::{hash_password, verify_password};
use crate::config::{AdminConfig, AuthConfig, QuotaConfig};
use crate::db::models::{AuthToken, Plan, User};
use crate::db::operations::DbOperations;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, decode, Header, EncodingKey, DecodingKey, Validation, Algorithm};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;
const ADMIN_SUBJECT: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // User ID, or "admin"
    pub role: Role,
    pub jti: String,  // Unique per token
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

/// Account store: registration, login, tokens and account mutations.
pub struct AuthService {
    db: DbOperations,
    auth: AuthConfig,
    admin: AdminConfig,
    quota: QuotaConfig,
}

impl AuthService {
    pub fn new(db: DbOperations, auth: AuthConfig, admin: AdminConfig, quota: QuotaConfig) -> Self {
        Self { db, auth, admin, quota }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let name = name.trim();
        let email = normalize_email(email);
        validate_registration(name, &email, password)?;

        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken.into());
        }

        let user = User::new(
            name.to_string(),
            email,
            hash_password(password)?,
            Plan::Free.messages_limit(&self.quota),
        );

        // The unique index settles races between two registrations.
        match self.db.create_user(&user).await {
            Ok(user) => {
                info!("Registered user {}", user.id);
                Ok(user)
            }
            Err(AppError::DatabaseError(DatabaseError::Duplicate)) => Err(AuthError::EmailTaken.into()),
            Err(e) => Err(e),
        }
    }

    /// Checks credentials and issues a token. Unknown email and wrong
    /// password are the same failure to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(String, User)> {
        let email = normalize_email(email);
        let user = match self.db.get_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                warn!("Login rejected: no account for {}", email);
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(password, &user.password_hash) {
            warn!("Login rejected: wrong password for user {}", user.id);
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.generate_token(&user.id.to_string(), Role::User)?;
        self.db
            .create_token(&AuthToken::new(user.id, token.clone(), self.auth.token_expiry_hours))
            .await?;
        self.db.update_last_login(user.id).await?;

        Ok((token, user))
    }

    pub async fn validate_token(&self, token: &str) -> Result<User> {
        // The token must still be on record (logout removes it)
        let session = self.db.get_token(token).await?
            .ok_or(AuthError::InvalidToken)?;

        if session.is_expired() {
            return Err(AuthError::TokenExpired.into());
        }

        let claims = self.decode_token(token)?;
        if claims.role != Role::User {
            return Err(AuthError::InvalidToken.into());
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let user = self.db.get_user_by_id(user_id).await?
            .ok_or(AuthError::InvalidToken)?;

        self.db.update_token_activity(token).await?;

        Ok(user)
    }

    pub async fn invalidate_token(&self, token: &str) -> Result<()> {
        if !self.db.delete_token(token).await? {
            return Err(AuthError::InvalidToken.into());
        }
        Ok(())
    }

    pub fn authenticate_admin(&self, username: &str, password: &str) -> Result<String> {
        let username_ok = username.as_bytes().ct_eq(self.admin.username.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.admin.password.as_bytes());
        if !bool::from(username_ok & password_ok) {
            warn!("Admin login rejected for {}", username);
            return Err(AuthError::InvalidCredentials.into());
        }
        self.generate_token(ADMIN_SUBJECT, Role::Admin)
    }

    pub fn validate_admin_token(&self, token: &str) -> Result<Claims> {
        let claims = self.decode_token(token)?;
        if claims.role != Role::Admin {
            return Err(AuthError::Forbidden.into());
        }
        Ok(claims)
    }

    /// Switches plan and resets the limit from the quota table.
    pub async fn update_plan(&self, user_id: Uuid, plan: Plan) -> Result<User> {
        let user = self.db
            .update_plan(user_id, plan, plan.messages_limit(&self.quota))
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))?;
        info!("User {} moved to plan {:?}", user_id, plan);
        Ok(user)
    }

    pub async fn update_name(&self, user_id: Uuid, name: &str) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("name must not be empty".into()));
        }
        self.db
            .update_user_name(user_id, name)
            .await?
            .ok_or_else(|| AppError::NotFound("user".into()))
    }

    pub async fn change_password(&self, user: &User, current: &str, new: &str) -> Result<()> {
        if !verify_password(current, &user.password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }
        validate_password(new)?;
        self.db.update_password_hash(user.id, &hash_password(new)?).await
    }

    pub async fn delete_account(&self, user_id: Uuid) -> Result<()> {
        if !self.db.delete_user(user_id).await? {
            return Err(AppError::NotFound("user".into()));
        }
        info!("Deleted user {}", user_id);
        Ok(())
    }

    fn generate_token(&self, subject: &str, role: Role) -> Result<String> {
        let now = Utc::now();
        let exp = (now + Duration::hours(self.auth.token_expiry_hours)).timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            role,
            jti: Uuid::new_v4().to_string(),
            exp,
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.auth.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn decode_token(&self, token: &str) -> Result<Claims> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.auth.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(claims.claims)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(name: &str, email: &str, password: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::ValidationError("name must not be empty".into()));
    }
    let valid_email = email
        .split_once('@')
        .map_or(false, |(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid_email {
        return Err(AppError::ValidationError("email address is invalid".into()));
    }
    validate_password(password)
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationError(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
