//! Persistence for users, session notes and the audit trail.
//!
//! Each store is an async trait with a Postgres implementation
//! (`postgres.rs`) and an in-memory one (`memory.rs`) for tests and
//! database-less development.

pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditLog;

pub use manager::{DatabaseError, DatabaseManager};
pub use models::{SessionNote, UserRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A row that cannot be mapped back into a model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    /// Fails with `Conflict` when the email is taken.
    async fn create(&self, user: &UserRecord) -> Result<(), StoreError>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Session notes. Soft-deleted rows are invisible to every read.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert(&self, note: &SessionNote) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<SessionNote>, StoreError>;
    async fn list_for_therapist(
        &self,
        therapist_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<SessionNote>, StoreError>;
    async fn update(&self, note: &SessionNote) -> Result<(), StoreError>;
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub notes: Arc<dyn NoteStore>,
    pub audit: Arc<dyn AuditLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(memory::MemoryUserStore::default()),
            notes: Arc::new(memory::MemoryNoteStore::default()),
            audit: Arc::new(memory::MemoryAuditLog::default()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(postgres::PgUserStore::new(pool.clone())),
            notes: Arc::new(postgres::PgNoteStore::new(pool.clone())),
            audit: Arc::new(postgres::PgAuditLog::new(pool)),
        }
    }
}
