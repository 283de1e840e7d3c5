use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::QuotaConfig;

/// `messages_limit` value meaning "no limit".
pub const UNLIMITED_MESSAGES: i64 = -1;

/// Title every session carries until its first message arrives.
pub const PLACEHOLDER_TITLE: &str = "नई चैट";

const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Premium,
    Enterprise,
}

impl Plan {
    /// Message quota for this plan.
    pub fn messages_limit(&self, quota: &QuotaConfig) -> i64 {
        match self {
            Plan::Free => quota.free_limit,
            Plan::Premium => quota.premium_limit,
            Plan::Enterprise => UNLIMITED_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub plan: Plan,
    pub messages_used: i64,
    pub messages_limit: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(name: String, email: String, password_hash: String, messages_limit: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            plan: Plan::Free,
            messages_used: 0,
            messages_limit,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.messages_limit < 0
    }
}

/// An issued login token; deleting the row logs the token out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(user_id: Uuid, token: String, expires_in_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            expires_at: now + chrono::Duration::hours(expires_in_hours),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Who a chat session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    User(Uuid),
    Guest(String),
}

impl Owner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<&str> {
        match self {
            Owner::User(_) => None,
            Owner::Guest(id) => Some(id.as_str()),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Owner::Guest(_))
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::User(id) => write!(f, "user:{}", id),
            Owner::Guest(id) => write!(f, "guest:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// A message before it is stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub text: String,
    pub sender: Sender,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            image_url: None,
            image_data: None,
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Bot,
            image_url: None,
            image_data: None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn new(owner: &Owner) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: owner.user_id(),
            guest_id: owner.guest_id().map(str::to_owned),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        match owner {
            Owner::User(id) => self.user_id == Some(*id),
            Owner::Guest(id) => self.guest_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// A session together with its ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn from_row(row: SessionRow, messages: Vec<Message>) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            messages,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Title derived from a session's first message: the first 30 characters,
/// with `...` appended when the text was longer.
pub fn derive_title(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Singleton upstream configuration, with the credential in the clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminApiConfig {
    pub api_key: Option<String>,
    pub selected_model: String,
    pub rate_limit: i64,
    pub max_tokens: i64,
    pub temperature: f64,
}

impl AdminApiConfig {
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AdminApiConfigRow {
    pub api_key_encrypted: Option<String>,
    pub selected_model: String,
    pub rate_limit: i64,
    pub max_tokens: i64,
    pub temperature: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
    Timeout,
}

/// One call to the upstream completion API.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiUsageLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub endpoint: String,
    pub model_used: String,
    pub tokens_used: i64,
    pub response_time_ms: i64,
    pub status: UsageStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row of the admin message log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageLogEntry {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub user_email: Option<String>,
    pub text: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title_short_text_kept() {
        assert_eq!(derive_title("नमस्ते"), "नमस्ते");
        assert_eq!(derive_title("  hello  "), "hello");
    }

    #[test]
    fn test_derive_title_counts_characters_not_bytes() {
        let text = "क".repeat(31);
        let title = derive_title(&text);
        assert_eq!(title, format!("{}...", "क".repeat(30)));

        let exact = "a".repeat(30);
        assert_eq!(derive_title(&exact), exact);
    }

    #[test]
    fn test_plan_limits() {
        let quota = QuotaConfig {
            free_limit: 100,
            premium_limit: 5000,
            guest_limit: 20,
            guest_reset: crate::config::GuestReset::Daily,
        };
        assert_eq!(Plan::Free.messages_limit(&quota), 100);
        assert_eq!(Plan::Premium.messages_limit(&quota), 5000);
        assert_eq!(Plan::Enterprise.messages_limit(&quota), UNLIMITED_MESSAGES);
    }

    #[test]
    fn test_user_unlimited_sentinel() {
        let mut user = User::new("a".into(), "a@example.com".into(), "h".into(), 1);
        assert!(!user.is_unlimited());
        user.messages_limit = UNLIMITED_MESSAGES;
        assert!(user.is_unlimited());
    }

    #[test]
    fn test_user_serialization_hides_password_hash() {
        let user = User::new("a".into(), "a@example.com".into(), "secret-hash".into(), 100);
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["plan"], "free");
    }

    #[test]
    fn test_session_ownership() {
        let user = Uuid::new_v4();
        let row = SessionRow::new(&Owner::User(user));
        assert!(row.is_owned_by(&Owner::User(user)));
        assert!(!row.is_owned_by(&Owner::User(Uuid::new_v4())));
        assert!(!row.is_owned_by(&Owner::Guest("device".into())));
        assert_eq!(row.title, PLACEHOLDER_TITLE);
    }
}
