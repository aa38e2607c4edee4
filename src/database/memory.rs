use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::user::normalize_email;
use super::{NoteStore, SessionNote, StoreError, UserRecord, UserStore};
use crate::audit::{AuditLog, AuditQuery, AuditRecord};

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = normalize_email(email);
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email == email && u.deleted_at.is_none())
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| u.deleted_at.is_none()).cloned())
    }

    async fn create(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let email = normalize_email(&user.email);
        if users.values().any(|u| u.email == email && u.deleted_at.is_none()) {
            return Err(StoreError::Conflict(format!("User '{}' already exists", email)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("User not found".to_string()))?;
        user.last_login_at = Some(at);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNoteStore {
    notes: RwLock<HashMap<Uuid, SessionNote>>,
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn insert(&self, note: &SessionNote) -> Result<(), StoreError> {
        let mut notes = self.notes.write().await;
        if notes.contains_key(&note.id) {
            return Err(StoreError::Conflict("Session note already exists".to_string()));
        }
        notes.insert(note.id, note.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SessionNote>, StoreError> {
        let notes = self.notes.read().await;
        Ok(notes.get(&id).filter(|n| n.deleted_at.is_none()).cloned())
    }

    async fn list_for_therapist(
        &self,
        therapist_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<SessionNote>, StoreError> {
        let notes = self.notes.read().await;
        let mut found: Vec<SessionNote> = notes
            .values()
            .filter(|n| n.deleted_at.is_none() && n.therapist_id == therapist_id)
            .filter(|n| client_id.map_or(true, |c| n.client_id == c))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.session_date.cmp(&a.session_date));
        Ok(found)
    }

    async fn update(&self, note: &SessionNote) -> Result<(), StoreError> {
        let mut notes = self.notes.write().await;
        match notes.get_mut(&note.id) {
            Some(existing) if existing.deleted_at.is_none() => {
                *existing = note.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound("Session note not found".to_string())),
        }
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut notes = self.notes.write().await;
        match notes.get_mut(&id) {
            Some(existing) if existing.deleted_at.is_none() => {
                existing.deleted_at = Some(at);
                Ok(())
            }
            _ => Err(StoreError::NotFound("Session note not found".to_string())),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::types::Role;
    use axum::http::Method;

    fn note(therapist_id: Uuid, client_id: Uuid) -> SessionNote {
        let now = Utc::now();
        SessionNote {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            therapist_id,
            client_id,
            note_type: "progress".to_string(),
            session_date: now,
            content: "v1.x.y".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn users_are_unique_by_email() {
        let store = MemoryUserStore::default();
        let user = UserRecord::new(None, "kim@example.com", "h", Role::Admin, "Kim", "Park");
        store.create(&user).await.unwrap();

        let dup = UserRecord::new(None, "KIM@example.com", "h", Role::Client, "K", "P");
        assert!(matches!(store.create(&dup).await, Err(StoreError::Conflict(_))));

        let found = store.find_by_email(" Kim@Example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        store.record_login(user.id, Utc::now()).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().unwrap().last_login_at.is_some());
    }

    #[tokio::test]
    async fn soft_deleted_notes_disappear() {
        let store = MemoryNoteStore::default();
        let therapist = Uuid::new_v4();
        let client = Uuid::new_v4();
        let a = note(therapist, client);
        let b = note(therapist, Uuid::new_v4());
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        assert_eq!(store.list_for_therapist(therapist, None).await.unwrap().len(), 2);
        assert_eq!(store.list_for_therapist(therapist, Some(client)).await.unwrap().len(), 1);

        store.soft_delete(a.id, Utc::now()).await.unwrap();
        assert!(store.get(a.id).await.unwrap().is_none());
        assert!(matches!(store.update(&a).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.soft_delete(a.id, Utc::now()).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.list_for_therapist(therapist, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_query_is_newest_first() {
        let log = MemoryAuditLog::default();
        for path in ["/one", "/two", "/three"] {
            log.append(&AuditRecord::new(AuditAction::Create, "x", &Method::POST, path)).await.unwrap();
        }
        let found = log.query(&AuditQuery { limit: Some(2), ..Default::default() }).await.unwrap();
        assert_eq!(found.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(), vec!["/three", "/two"]);
    }
}
