use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::chat::active::ActiveSessions;
use crate::db::models::{ChatSession, NewMessage, Owner, SessionRow};
use crate::db::operations::DbOperations;
use crate::error::AppError;
use crate::Result;

const MAX_TITLE_CHARS: usize = 100;

fn not_found() -> AppError {
    AppError::NotFound("chat session".into())
}

/// Per-owner chat sessions and the active-session pointer. A session id that
/// belongs to someone else behaves exactly like one that does not exist.
pub struct SessionStore {
    db: DbOperations,
    active: ActiveSessions,
}

impl SessionStore {
    pub fn new(db: DbOperations) -> Self {
        Self {
            db,
            active: ActiveSessions::new(),
        }
    }

    async fn load(&self, row: SessionRow) -> Result<ChatSession> {
        let messages = self.db.list_messages(row.id).await?;
        Ok(ChatSession::from_row(row, messages))
    }

    async fn owned_row(&self, owner: &Owner, id: Uuid) -> Result<Option<SessionRow>> {
        Ok(self.db.get_session(id).await?.filter(|row| row.is_owned_by(owner)))
    }

    /// Creates an empty session and makes it active.
    pub async fn create(&self, owner: &Owner) -> Result<ChatSession> {
        let row = self.db.create_session(owner).await?;
        self.active.set(owner, row.id).await;
        info!("Created chat session {} for {}", row.id, owner);
        Ok(ChatSession::from_row(row, Vec::new()))
    }

    /// All sessions of `owner`, most recently updated first.
    pub async fn list(&self, owner: &Owner) -> Result<Vec<ChatSession>> {
        let rows = self.db.list_sessions(owner).await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(self.load(row).await?);
        }
        Ok(sessions)
    }

    pub async fn get(&self, owner: &Owner, id: Uuid) -> Result<ChatSession> {
        let row = self.owned_row(owner, id).await?.ok_or_else(not_found)?;
        self.load(row).await
    }

    /// The session the owner is chatting in: the pointer if it is still
    /// valid, else the most recent session, else a freshly created one.
    pub async fn active(&self, owner: &Owner) -> Result<ChatSession> {
        if let Some(id) = self.active.get(owner).await {
            if let Some(row) = self.owned_row(owner, id).await? {
                return self.load(row).await;
            }
            self.active.clear_if(owner, id).await;
        }

        match self.db.list_sessions(owner).await?.into_iter().next() {
            Some(row) => {
                self.active.set(owner, row.id).await;
                self.load(row).await
            }
            None => self.create(owner).await,
        }
    }

    /// Points the owner at `id`. An id the owner does not own is ignored.
    pub async fn switch(&self, owner: &Owner, id: Uuid) -> Result<ChatSession> {
        if self.owned_row(owner, id).await?.is_some() {
            self.active.set(owner, id).await;
        }
        self.active(owner).await
    }

    pub async fn rename(&self, owner: &Owner, id: Uuid, title: &str) -> Result<ChatSession> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::ValidationError("title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::ValidationError(format!(
                "title must be at most {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let row = self.db.rename_session(owner, id, title).await?.ok_or_else(not_found)?;
        self.load(row).await
    }

    /// Deletes a session and returns the session that is active afterwards.
    /// The owner is never left without a session.
    pub async fn delete(&self, owner: &Owner, id: Uuid) -> Result<ChatSession> {
        let replacement = self.db.delete_session_keeping_one(owner, id).await?;
        info!("Deleted chat session {} of {}", id, owner);

        if let Some(row) = replacement {
            self.active.set(owner, row.id).await;
            return Ok(ChatSession::from_row(row, Vec::new()));
        }

        self.active.clear_if(owner, id).await;
        self.active(owner).await
    }

    pub async fn append(&self, owner: &Owner, id: Uuid, message: NewMessage) -> Result<ChatSession> {
        self.db.append_message(owner, id, message).await
    }

    /// Removes every message of a session but keeps the session.
    pub async fn clear(&self, owner: &Owner, id: Uuid) -> Result<ChatSession> {
        let row = self.db.clear_messages(owner, id).await?.ok_or_else(not_found)?;
        Ok(ChatSession::from_row(row, Vec::new()))
    }

    /// Removes all of the owner's sessions and starts over with one.
    pub async fn clear_all(&self, owner: &Owner) -> Result<ChatSession> {
        let row = self.db.reset_sessions(owner).await?;
        self.active.set(owner, row.id).await;
        info!("Cleared all chat sessions of {}", owner);
        Ok(ChatSession::from_row(row, Vec::new()))
    }

    /// Drops in-memory state of an owner whose account is gone.
    pub async fn forget(&self, owner: &Owner) {
        self.active.remove(owner).await;
    }

    /// Forgets which session idle guests had open. Their sessions stay stored.
    pub async fn prune_idle_guests(&self, max_idle: Duration) -> usize {
        self.active.prune_idle_guests(max_idle).await
    }
}
