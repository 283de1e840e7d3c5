use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::db::models::Owner;

#[derive(Debug, Clone, Copy)]
struct ActivePointer {
    session_id: Uuid,
    set_at: Instant,
}

/// Which session each owner is currently chatting in.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    pointers: Arc<RwLock<HashMap<Owner, ActivePointer>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, owner: &Owner) -> Option<Uuid> {
        self.pointers.read().await.get(owner).map(|p| p.session_id)
    }

    pub async fn set(&self, owner: &Owner, session_id: Uuid) {
        let pointer = ActivePointer { session_id, set_at: Instant::now() };
        self.pointers.write().await.insert(owner.clone(), pointer);
        debug!("Active session of {} is now {}", owner, session_id);
    }

    /// Drops the pointer only if it still points at `session_id`.
    pub async fn clear_if(&self, owner: &Owner, session_id: Uuid) -> bool {
        let mut pointers = self.pointers.write().await;
        if pointers.get(owner).map(|p| p.session_id) == Some(session_id) {
            pointers.remove(owner);
            return true;
        }
        false
    }

    pub async fn remove(&self, owner: &Owner) -> bool {
        self.pointers.write().await.remove(owner).is_some()
    }

    /// Drops guest pointers not set within `max_idle`. A dropped pointer
    /// falls back to the guest's most recent session. Returns how many went.
    pub async fn prune_idle_guests(&self, max_idle: Duration) -> usize {
        let mut pointers = self.pointers.write().await;
        let before = pointers.len();
        pointers.retain(|owner, pointer| !owner.is_guest() || pointer.set_at.elapsed() < max_idle);
        before - pointers.len()
    }
}

/// Sessions with an upstream call in flight.
#[derive(Debug, Default, Clone)]
pub struct TypingSessions {
    sessions: Arc<std::sync::Mutex<HashSet<Uuid>>>,
}

impl TypingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `session_id` as typing. Returns `None` when it already is.
    /// The mark is cleared when the returned guard drops.
    pub fn start(&self, session_id: Uuid) -> Option<TypingGuard> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if !sessions.insert(session_id) {
            return None;
        }
        Some(TypingGuard {
            sessions: self.sessions.clone(),
            session_id,
        })
    }

    pub fn is_typing(&self, session_id: Uuid) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&session_id)
    }
}

pub struct TypingGuard {
    sessions: Arc<std::sync::Mutex<HashSet<Uuid>>>,
    session_id: Uuid,
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active_pointer() {
        let active = ActiveSessions::new();
        let owner = Owner::Guest("device".into());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(active.get(&owner).await, None);
        active.set(&owner, first).await;
        active.set(&owner, second).await;
        assert_eq!(active.get(&owner).await, Some(second));

        assert!(!active.clear_if(&owner, first).await);
        assert!(active.clear_if(&owner, second).await);
        assert_eq!(active.get(&owner).await, None);
    }

    #[tokio::test]
    async fn test_prune_idle_guests_keeps_users() {
        let active = ActiveSessions::new();
        let user = Owner::User(Uuid::new_v4());
        let guest = Owner::Guest("device".into());
        active.set(&user, Uuid::new_v4()).await;
        active.set(&guest, Uuid::new_v4()).await;

        assert_eq!(active.prune_idle_guests(Duration::from_secs(3600)).await, 0);
        assert!(active.get(&guest).await.is_some());

        assert_eq!(active.prune_idle_guests(Duration::ZERO).await, 1);
        assert!(active.get(&guest).await.is_none());
        assert!(active.get(&user).await.is_some());
    }

    #[test]
    fn test_typing_guard_clears_on_drop() {
        let typing = TypingSessions::new();
        let id = Uuid::new_v4();

        let guard = typing.start(id).expect("first start");
        assert!(typing.is_typing(id));
        assert!(typing.start(id).is_none());

        drop(guard);
        assert!(!typing.is_typing(id));
        assert!(typing.start(id).is_some());
    }
}
