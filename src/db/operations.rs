use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{
    derive_title, AdminApiConfigRow, ApiUsageLog, AuthToken, ChatSession, Message,
    MessageLogEntry, NewMessage, Owner, Plan, Sender, SessionRow, User, PLACEHOLDER_TITLE,
};
use crate::error::{AppError, DatabaseError};
use crate::Result;

const USER_COLUMNS: &str = "id, name, email, password_hash, plan, messages_used, messages_limit, created_at, updated_at, last_login";
const SESSION_COLUMNS: &str = "id, user_id, guest_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, text, sender, image_url, image_data, created_at";

#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<SqlitePool>,
}

impl DbOperations {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Opens the pool described by `config`. An in-memory database is held on
    /// a single connection that is never recycled, otherwise it would vanish.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = config.url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Connected to database (in_memory: {})", in_memory);
        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- users ----

    pub async fn create_user(&self, user: &User) -> Result<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.plan)
        .bind(user.messages_used)
        .bind(user.messages_limit)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(created)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }

    pub async fn update_user_name(&self, id: Uuid, name: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = ?, updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    pub async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    pub async fn update_last_login(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    /// Sets the plan and its limit. `messages_used` is left alone.
    pub async fn update_plan(&self, id: Uuid, plan: Plan, messages_limit: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET plan = ?, messages_limit = ?, updated_at = ? WHERE id = ? RETURNING {USER_COLUMNS}"
        ))
        .bind(plan)
        .bind(messages_limit)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    /// Consumes one message of the user's quota. The check and the increment
    /// are one statement, so concurrent callers cannot overshoot the limit.
    pub async fn try_increment_message_count(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET messages_used = messages_used + 1, updated_at = ? \
             WHERE id = ? AND (messages_limit < 0 OR messages_used < messages_limit)",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Removes the user; sessions, messages and tokens go with it.
    pub async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- auth tokens ----

    pub async fn create_token(&self, token: &AuthToken) -> Result<AuthToken> {
        let token = sqlx::query_as::<_, AuthToken>(
            "INSERT INTO auth_tokens (id, user_id, token, expires_at, created_at, last_activity) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.last_activity)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(token)
    }

    pub async fn get_token(&self, token: &str) -> Result<Option<AuthToken>> {
        let token = sqlx::query_as::<_, AuthToken>("SELECT * FROM auth_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(token)
    }

    pub async fn update_token_activity(&self, token: &str) -> Result<()> {
        sqlx::query("UPDATE auth_tokens SET last_activity = ? WHERE token = ?")
            .bind(Utc::now())
            .bind(token)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    pub async fn delete_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE token = ?")
            .bind(token)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    // ---- chat sessions ----

    pub async fn create_session(&self, owner: &Owner) -> Result<SessionRow> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut *conn, &SessionRow::new(owner)).await
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    /// Sessions of `owner`, most recently updated first.
    pub async fn list_sessions(&self, owner: &Owner) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE user_id = ? OR guest_id = ? \
             ORDER BY updated_at DESC, rowid DESC"
        ))
        .bind(owner.user_id())
        .bind(owner.guest_id())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    pub async fn rename_session(&self, owner: &Owner, id: Uuid, title: &str) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE chat_sessions SET title = ?, updated_at = ? \
             WHERE id = ? AND (user_id = ? OR guest_id = ?) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(title)
        .bind(Utc::now())
        .bind(id)
        .bind(owner.user_id())
        .bind(owner.guest_id())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    /// Deletes one of `owner`'s sessions. When it was the last one, a fresh
    /// session is inserted in the same transaction and returned.
    pub async fn delete_session_keeping_one(&self, owner: &Owner, id: Uuid) -> Result<Option<SessionRow>> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM chat_sessions WHERE id = ? AND (user_id = ? OR guest_id = ?)")
            .bind(id)
            .bind(owner.user_id())
            .bind(owner.guest_id())
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound("chat session".into()));
        }

        let remaining = count_sessions(&mut *tx, owner).await?;
        let replacement = if remaining == 0 {
            Some(insert_session(&mut *tx, &SessionRow::new(owner)).await?)
        } else {
            None
        };

        tx.commit().await?;
        Ok(replacement)
    }

    /// Deletes every session of `owner` and leaves one fresh session behind.
    pub async fn reset_sessions(&self, owner: &Owner) -> Result<SessionRow> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chat_sessions WHERE user_id = ? OR guest_id = ?")
            .bind(owner.user_id())
            .bind(owner.guest_id())
            .execute(&mut *tx)
            .await?;
        let session = insert_session(&mut *tx, &SessionRow::new(owner)).await?;

        tx.commit().await?;
        Ok(session)
    }

    // ---- messages ----

    pub async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(session_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(messages)
    }

    /// Appends a message to one of `owner`'s sessions and returns the updated
    /// session. The first user message replaces the placeholder title.
    pub async fn append_message(&self, owner: &Owner, session_id: Uuid, message: NewMessage) -> Result<ChatSession> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .filter(|row| row.is_owned_by(owner))
        .ok_or_else(|| AppError::NotFound("chat session".into()))?;

        let user_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE session_id = ? AND sender = ?",
        )
        .bind(session_id)
        .bind(Sender::User)
        .fetch_one(&mut *tx)
        .await?;

        // Timestamps never run behind the session's last update.
        let now = std::cmp::max(Utc::now(), row.updated_at);

        sqlx::query(&format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"))
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(&message.text)
            .bind(message.sender)
            .bind(&message.image_url)
            .bind(&message.image_data)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let title = if message.sender == Sender::User && user_messages == 0 && row.title == PLACEHOLDER_TITLE {
            let title = derive_title(&message.text);
            debug!("Session {} titled from first message: {}", session_id, title);
            title
        } else {
            row.title.clone()
        };

        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE chat_sessions SET title = ?, updated_at = ? WHERE id = ? RETURNING {SESSION_COLUMNS}"
        ))
        .bind(&title)
        .bind(now)
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ChatSession::from_row(row, messages))
    }

    pub async fn clear_messages(&self, owner: &Owner, session_id: Uuid) -> Result<Option<SessionRow>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE chat_sessions SET updated_at = ? \
             WHERE id = ? AND (user_id = ? OR guest_id = ?) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(session_id)
        .bind(owner.user_id())
        .bind(owner.guest_id())
        .fetch_optional(&mut *tx)
        .await?;

        if row.is_some() {
            sqlx::query("DELETE FROM messages WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    pub async fn recent_messages(&self, limit: i64) -> Result<Vec<MessageLogEntry>> {
        let entries = sqlx::query_as::<_, MessageLogEntry>(
            "SELECT m.id, m.session_id, s.user_id, s.guest_id, u.email AS user_email, \
                    m.text, m.sender, m.created_at \
             FROM messages m \
             JOIN chat_sessions s ON s.id = m.session_id \
             LEFT JOIN users u ON u.id = s.user_id \
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(entries)
    }

    // ---- admin configuration ----

    pub async fn get_admin_config(&self) -> Result<Option<AdminApiConfigRow>> {
        let row = sqlx::query_as::<_, AdminApiConfigRow>(
            "SELECT api_key_encrypted, selected_model, rate_limit, max_tokens, temperature, updated_at \
             FROM admin_api_config WHERE id = 1",
        )
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    /// Replaces the singleton row; the last writer wins.
    pub async fn put_admin_config(&self, row: &AdminApiConfigRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_api_config (id, api_key_encrypted, selected_model, rate_limit, max_tokens, temperature, updated_at) \
             VALUES (1, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                api_key_encrypted = excluded.api_key_encrypted, \
                selected_model = excluded.selected_model, \
                rate_limit = excluded.rate_limit, \
                max_tokens = excluded.max_tokens, \
                temperature = excluded.temperature, \
                updated_at = excluded.updated_at",
        )
        .bind(&row.api_key_encrypted)
        .bind(&row.selected_model)
        .bind(row.rate_limit)
        .bind(row.max_tokens)
        .bind(row.temperature)
        .bind(row.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    // ---- usage logs ----

    pub async fn insert_usage_log(&self, log: &ApiUsageLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO api_usage_logs (id, user_id, guest_id, endpoint, model_used, tokens_used, \
             response_time_ms, status, error_message, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id)
        .bind(log.user_id)
        .bind(&log.guest_id)
        .bind(&log.endpoint)
        .bind(&log.model_used)
        .bind(log.tokens_used)
        .bind(log.response_time_ms)
        .bind(log.status)
        .bind(&log.error_message)
        .bind(log.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    pub async fn list_usage_logs(&self, limit: i64) -> Result<Vec<ApiUsageLog>> {
        let logs = sqlx::query_as::<_, ApiUsageLog>(
            "SELECT * FROM api_usage_logs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(logs)
    }

    // ---- reporting ----

    pub async fn count_users(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool.as_ref())
            .await?)
    }

    pub async fn count_users_by_plan(&self) -> Result<Vec<(Plan, i64)>> {
        Ok(sqlx::query_as::<_, (Plan, i64)>("SELECT plan, COUNT(*) FROM users GROUP BY plan")
            .fetch_all(self.pool.as_ref())
            .await?)
    }

    pub async fn count_users_created_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= ?")
            .bind(since)
            .fetch_one(self.pool.as_ref())
            .await?)
    }

    pub async fn count_messages(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool.as_ref())
            .await?)
    }

    pub async fn count_usage_logs(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM api_usage_logs")
            .fetch_one(self.pool.as_ref())
            .await?)
    }
}

async fn insert_session(conn: &mut SqliteConnection, row: &SessionRow) -> Result<SessionRow> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "INSERT INTO chat_sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?) RETURNING {SESSION_COLUMNS}"
    ))
    .bind(row.id)
    .bind(row.user_id)
    .bind(&row.guest_id)
    .bind(&row.title)
    .bind(row.created_at)
    .bind(row.updated_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row)
}

async fn count_sessions(conn: &mut SqliteConnection, owner: &Owner) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE user_id = ? OR guest_id = ?")
        .bind(owner.user_id())
        .bind(owner.guest_id())
        .fetch_one(&mut *conn)
        .await?)
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> DbOperations {
    let settings = crate::Settings::new_for_test().expect("Failed to load test config");
    let db = DbOperations::connect(&settings.database)
        .await
        .expect("Failed to open in-memory database");
    db.migrate().await.expect("Failed to run migrations");
    db
}
