//! User records and the store they live in.
//!
//! Rooms and the queue never write fields directly; every change goes
//! through [`UserStore::alter`] with a [`UserEvent`], so the store can
//! validate and publish it.

pub mod record;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

pub use record::{
    RecentGame, UserAttribute, UserEvent, UserId, UserRecord, RECENT_GAMES, TROPHIES_UNSET,
};

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No such user.
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    /// The event is not valid for this record.
    #[error("Alteration rejected: {0}")]
    AlterRejected(String),
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChangeKind {
    /// Record created.
    Created,
    /// Record altered.
    Changed,
    /// Record removed.
    Deleted,
}

/// Change notification published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserChange {
    /// Kind of change.
    pub kind: UserChangeKind,
    /// Affected user.
    pub userid: UserId,
}

/// Keyed user store with change notifications.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a copy of a record.
    async fn get(&self, userid: &str) -> Result<UserRecord, StoreError>;

    /// Apply an event and return the updated record.
    async fn alter(&self, userid: &str, event: UserEvent) -> Result<UserRecord, StoreError>;

    /// Return the existing record, or insert `record` and return it.
    async fn get_or_create(&self, record: UserRecord) -> UserRecord;

    /// Remove a record.
    async fn remove(&self, userid: &str) -> Result<(), StoreError>;

    /// Subscribe to changes.
    fn subscribe(&self) -> broadcast::Receiver<UserChange>;
}

/// Store kept entirely in memory.
pub struct InMemoryUserStore {
    users: RwLock<BTreeMap<UserId, UserRecord>>,
    changes: broadcast::Sender<UserChange>,
}

impl InMemoryUserStore {
    /// Empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            users: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// True if no records exist.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    fn publish(&self, kind: UserChangeKind, userid: &str) {
        // No receivers is fine
        let _ = self.changes.send(UserChange {
            kind,
            userid: userid.to_string(),
        });
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, userid: &str) -> Result<UserRecord, StoreError> {
        self.users
            .read()
            .await
            .get(userid)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(userid.to_string()))
    }

    async fn alter(&self, userid: &str, event: UserEvent) -> Result<UserRecord, StoreError> {
        let updated = {
            let mut users = self.users.write().await;
            let record = users
                .get_mut(userid)
                .ok_or_else(|| StoreError::UserNotFound(userid.to_string()))?;
            // Apply to a copy so a rejected event leaves the record untouched
            let mut next = record.clone();
            next.apply(&event)?;
            *record = next.clone();
            next
        };
        self.publish(UserChangeKind::Changed, userid);
        Ok(updated)
    }

    async fn get_or_create(&self, record: UserRecord) -> UserRecord {
        let (result, created) = {
            let mut users = self.users.write().await;
            match users.get(&record.userid) {
                Some(existing) => (existing.clone(), false),
                None => {
                    users.insert(record.userid.clone(), record.clone());
                    (record, true)
                }
            }
        };
        if created {
            self.publish(UserChangeKind::Created, &result.userid);
        }
        result
    }

    async fn remove(&self, userid: &str) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .remove(userid)
            .ok_or_else(|| StoreError::UserNotFound(userid.to_string()))?;
        self.publish(UserChangeKind::Deleted, userid);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<UserChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_keeps_existing() {
        let store = InMemoryUserStore::new();
        let mut first = UserRecord::new("u1", "alice", false);
        first.xp = 10;
        store.get_or_create(first).await;

        let second = store
            .get_or_create(UserRecord::new("u1", "someone-else", false))
            .await;
        assert_eq!(second.username, "alice");
        assert_eq!(second.xp, 10);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_alter_leaves_record() {
        let store = InMemoryUserStore::new();
        store.get_or_create(UserRecord::new("u1", "alice", false)).await;
        store
            .alter("u1", UserEvent::SetInitialTrophies { trophies: 400 })
            .await
            .unwrap();

        let err = store
            .alter("u1", UserEvent::SetInitialTrophies { trophies: 2000 })
            .await;
        assert!(matches!(err, Err(StoreError::AlterRejected(_))));
        assert_eq!(store.get("u1").await.unwrap().trophies, 400);
    }

    #[tokio::test]
    async fn test_missing_user() {
        let store = InMemoryUserStore::new();
        assert_eq!(
            store.get("ghost").await,
            Err(StoreError::UserNotFound("ghost".to_string()))
        );
        assert!(store.alter("ghost", UserEvent::Online).await.is_err());
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let store = InMemoryUserStore::new();
        let mut changes = store.subscribe();

        store.get_or_create(UserRecord::new("u1", "alice", false)).await;
        store
            .alter(
                "u1",
                UserEvent::UpdateAttribute(UserAttribute::AllowBotOpponents(false)),
            )
            .await
            .unwrap();
        store.remove("u1").await.unwrap();

        let kinds: Vec<_> = (0..3).map(|_| changes.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![
                UserChangeKind::Created,
                UserChangeKind::Changed,
                UserChangeKind::Deleted
            ]
        );
    }
}
