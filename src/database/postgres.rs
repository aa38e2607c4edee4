use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::models::user::normalize_email;
use super::{NoteStore, SessionNote, StoreError, UserRecord, UserStore};
use crate::audit::{AuditAction, AuditLog, AuditQuery, AuditRecord};
use crate::types::Role;

const USER_COLUMNS: &str = "id, tenant_id, email, password_hash, role, first_name, last_name, \
     is_active, phi_salt, last_login_at, created_at, updated_at, deleted_at";

const NOTE_COLUMNS: &str = "id, tenant_id, therapist_id, client_id, note_type, session_date, \
     content, created_at, updated_at, deleted_at";

const AUDIT_COLUMNS: &str = "id, occurred_at, actor_id, actor_role, tenant_id, action, resource_type, \
     resource_id, method, path, status, ip, user_agent, before_state, after_state, phi_accessed";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: role.parse::<Role>().map_err(StoreError::Corrupt)?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
        phi_salt: row.try_get("phi_salt")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn note_from_row(row: &PgRow) -> Result<SessionNote, StoreError> {
    Ok(SessionNote {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        therapist_id: row.try_get("therapist_id")?,
        client_id: row.try_get("client_id")?,
        note_type: row.try_get("note_type")?,
        session_date: row.try_get("session_date")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let action: String = row.try_get("action")?;
    let actor_role: Option<String> = row.try_get("actor_role")?;
    let status: i32 = row.try_get("status")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        occurred_at: row.try_get("occurred_at")?,
        actor_id: row.try_get("actor_id")?,
        actor_role: actor_role
            .map(|r| r.parse::<Role>())
            .transpose()
            .map_err(StoreError::Corrupt)?,
        tenant_id: row.try_get("tenant_id")?,
        action: action.parse::<AuditAction>().map_err(StoreError::Corrupt)?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        status: u16::try_from(status).map_err(|_| StoreError::Corrupt(format!("status {}", status)))?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
        before: row.try_get("before_state")?,
        after: row.try_get("after_state")?,
        phi_accessed: row.try_get("phi_accessed")?,
    })
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users WHERE lower(email) = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create(&self, user: &UserRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO users ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            USER_COLUMNS
        );
        sqlx::query(&sql)
            .bind(user.id)
            .bind(user.tenant_id)
            .bind(normalize_email(&user.email))
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.is_active)
            .bind(&user.phi_salt)
            .bind(user.last_login_at)
            .bind(user.created_at)
            .bind(user.updated_at)
            .bind(user.deleted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("User '{}' already exists", user.email))
                } else {
                    StoreError::Sqlx(e)
                }
            })?;
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User not found".to_string()));
        }
        Ok(())
    }
}

pub struct PgNoteStore {
    pool: PgPool,
}

impl PgNoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NoteStore for PgNoteStore {
    async fn insert(&self, note: &SessionNote) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO session_notes ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            NOTE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(note.id)
            .bind(note.tenant_id)
            .bind(note.therapist_id)
            .bind(note.client_id)
            .bind(&note.note_type)
            .bind(note.session_date)
            .bind(&note.content)
            .bind(note.created_at)
            .bind(note.updated_at)
            .bind(note.deleted_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("Session note already exists".to_string())
                } else {
                    StoreError::Sqlx(e)
                }
            })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SessionNote>, StoreError> {
        let sql = format!(
            "SELECT {} FROM session_notes WHERE id = $1 AND deleted_at IS NULL",
            NOTE_COLUMNS
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(note_from_row).transpose()
    }

    async fn list_for_therapist(
        &self,
        therapist_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<SessionNote>, StoreError> {
        let sql = format!(
            "SELECT {} FROM session_notes \
             WHERE therapist_id = $1 AND ($2::uuid IS NULL OR client_id = $2) AND deleted_at IS NULL \
             ORDER BY session_date DESC",
            NOTE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(therapist_id)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(note_from_row).collect()
    }

    async fn update(&self, note: &SessionNote) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE session_notes SET note_type = $2, session_date = $3, content = $4, updated_at = $5 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(note.id)
        .bind(&note.note_type)
        .bind(note.session_date)
        .bind(&note.content)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Session note not found".to_string()));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE session_notes SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Session note not found".to_string()));
        }
        Ok(())
    }
}

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO audit_logs ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            AUDIT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(record.id)
            .bind(record.occurred_at)
            .bind(record.actor_id)
            .bind(record.actor_role.map(|r| r.as_str()))
            .bind(record.tenant_id)
            .bind(record.action.as_str())
            .bind(&record.resource_type)
            .bind(&record.resource_id)
            .bind(&record.method)
            .bind(&record.path)
            .bind(i32::from(record.status))
            .bind(&record.ip)
            .bind(&record.user_agent)
            .bind(&record.before)
            .bind(&record.after)
            .bind(record.phi_accessed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM audit_logs WHERE TRUE", AUDIT_COLUMNS));

        if let Some(tenant_id) = query.tenant_id {
            builder.push(" AND tenant_id = ").push_bind(tenant_id);
        }
        if let Some(actor_id) = query.actor_id {
            builder.push(" AND actor_id = ").push_bind(actor_id);
        }
        if let Some(resource_type) = &query.resource_type {
            builder.push(" AND resource_type = ").push_bind(resource_type.clone());
        }
        if let Some(action) = query.action {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        if query.phi_only {
            builder.push(" AND phi_accessed");
        }
        if let Some(since) = query.since {
            builder.push(" AND occurred_at >= ").push_bind(since);
        }
        builder
            .push(" ORDER BY occurred_at DESC LIMIT ")
            .push_bind(query.effective_limit());

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(audit_from_row).collect()
    }
}
