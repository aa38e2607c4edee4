//! Clinical session notes: the one PHI resource this API serves.
//!
//! Content is encrypted with the author's session key before it reaches the
//! store and only decrypted for an instance-level `read` grant. Audit
//! snapshots describe notes by metadata and a digest of the plaintext.

use axum::{
    extract::{rejection::PathRejection, rejection::QueryRejection, Path, Query, State},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{digest, AuditSnapshot};
use crate::authz::{Ability, Action, Resource, Subject};
use crate::crypto::{decrypt_field, encrypt_field, EncryptedField, PhiKey};
use crate::database::SessionNote;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::security::{Field, Schema, ValidJson, Validate};
use crate::state::AppState;

const MAX_CONTENT_LEN: usize = 100_000;
const AUDIT_RESOURCE: &str = "session_note";

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub client_id: Uuid,
    pub note_type: String,
    pub session_date: DateTime<Utc>,
    pub content: String,
}

impl Validate for CreateNoteRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::new("client_id").required().uuid())
            .field(Field::new("note_type").required().one_of(SessionNote::TYPES))
            .field(Field::new("session_date").required().string())
            .field(Field::new("content").required().string().max_len(MAX_CONTENT_LEN))
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateNoteRequest {
    pub note_type: Option<String>,
    pub session_date: Option<DateTime<Utc>>,
    pub content: Option<String>,
}

impl Validate for UpdateNoteRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::new("note_type").optional().one_of(SessionNote::TYPES))
            .field(Field::new("session_date").optional().string())
            .field(Field::new("content").optional().string().min_len(1).max_len(MAX_CONTENT_LEN))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListNotesQuery {
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct NoteView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub note_type: String,
    pub session_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteView {
    fn summary(note: &SessionNote) -> Self {
        Self {
            id: note.id,
            tenant_id: note.tenant_id,
            therapist_id: note.therapist_id,
            client_id: note.client_id,
            note_type: note.note_type.clone(),
            session_date: note.session_date,
            content: None,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }

    fn with_content(note: &SessionNote, content: String) -> Self {
        Self {
            content: Some(content),
            ..Self::summary(note)
        }
    }
}

/// What the audit trail keeps about a note instead of its content.
fn audit_metadata(note: &SessionNote, plaintext: Option<&str>) -> Value {
    let mut meta = json!({
        "client_id": note.client_id,
        "therapist_id": note.therapist_id,
        "note_type": note.note_type,
        "session_date": note.session_date,
    });
    if let Some(text) = plaintext {
        meta["content_sha256"] = json!(digest(text));
        meta["content_length"] = json!(text.chars().count());
    }
    meta
}

fn decrypt_note(key: &PhiKey, note: &SessionNote) -> Result<String, ApiError> {
    let field: EncryptedField = note.content.parse()?;
    Ok(decrypt_field(key, &field, &SessionNote::encryption_context(&note.id))?)
}

async fn load_note(state: &AppState, id: Uuid) -> Result<SessionNote, ApiError> {
    state
        .stores
        .notes
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Session note {} not found", id)))
}

/// POST /api/notes
pub async fn note_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    ValidJson(payload): ValidJson<CreateNoteRequest>,
) -> ApiResult<NoteView> {
    ability.ensure(Action::Create, Subject::SessionNote)?;
    let tenant_id = user
        .tenant_id
        .ok_or_else(|| ApiError::forbidden("Session notes belong to a practice; this account has none"))?;
    let key = state.keyring.get(&user.claims.jti)?;

    let now = Utc::now();
    let id = Uuid::new_v4();
    let encrypted = encrypt_field(&key, &payload.content, &SessionNote::encryption_context(&id))?;
    let note = SessionNote {
        id,
        tenant_id,
        therapist_id: user.id,
        client_id: payload.client_id,
        note_type: payload.note_type,
        session_date: payload.session_date,
        content: encrypted.to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.stores.notes.insert(&note).await?;

    tracing::info!(note_id = %note.id, therapist_id = %user.id, "Session note created");

    let snapshot =
        AuditSnapshot::resource(AUDIT_RESOURCE, note.id).after(audit_metadata(&note, Some(&payload.content)));
    Ok(ApiResponse::created(NoteView::with_content(&note, payload.content)).audited(snapshot))
}

/// GET /api/notes?client_id=
///
/// Summaries only; content is never decrypted in bulk.
pub async fn notes_get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    query: Result<Query<ListNotesQuery>, QueryRejection>,
) -> ApiResult<Vec<NoteView>> {
    let Query(query) = query?;
    let notes = state.stores.notes.list_for_therapist(user.id, query.client_id).await?;

    let visible: Vec<NoteView> = notes
        .iter()
        .filter(|note| ability.can_on(Action::Read, &Resource::from(*note)))
        .map(NoteView::summary)
        .collect();

    let snapshot = AuditSnapshot {
        resource_type: Some(AUDIT_RESOURCE.to_string()),
        after: Some(json!({ "client_id": query.client_id, "count": visible.len() })),
        ..Default::default()
    };
    Ok(ApiResponse::success(visible).audited(snapshot))
}

/// GET /api/notes/:id
pub async fn note_get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<NoteView> {
    let Path(id) = path?;
    let note = load_note(&state, id).await?;
    ability.ensure_on(Action::Read, &Resource::from(&note))?;

    let key = state.keyring.get(&user.claims.jti)?;
    let content = decrypt_note(&key, &note)?;

    let snapshot = AuditSnapshot::resource(AUDIT_RESOURCE, note.id);
    Ok(ApiResponse::success(NoteView::with_content(&note, content)).audited(snapshot))
}

/// PUT /api/notes/:id
pub async fn note_put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    path: Result<Path<Uuid>, PathRejection>,
    ValidJson(payload): ValidJson<UpdateNoteRequest>,
) -> ApiResult<NoteView> {
    let Path(id) = path?;
    let mut note = load_note(&state, id).await?;
    ability.ensure_on(Action::Update, &Resource::from(&note))?;

    let key = state.keyring.get(&user.claims.jti)?;
    let current = decrypt_note(&key, &note)?;
    let before = audit_metadata(&note, Some(&current));

    if let Some(note_type) = payload.note_type {
        note.note_type = note_type;
    }
    if let Some(session_date) = payload.session_date {
        note.session_date = session_date;
    }
    let content = match payload.content {
        Some(content) => {
            note.content = encrypt_field(&key, &content, &SessionNote::encryption_context(&note.id))?.to_string();
            content
        }
        None => current,
    };
    note.updated_at = Utc::now();
    state.stores.notes.update(&note).await?;

    tracing::info!(note_id = %note.id, therapist_id = %user.id, "Session note updated");

    let snapshot = AuditSnapshot::resource(AUDIT_RESOURCE, note.id)
        .before(before)
        .after(audit_metadata(&note, Some(&content)));
    Ok(ApiResponse::success(NoteView::with_content(&note, content)).audited(snapshot))
}

/// DELETE /api/notes/:id
///
/// Soft delete. The digest is only recorded when this session can still
/// decrypt the note.
pub async fn note_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;
    let note = load_note(&state, id).await?;
    ability.ensure_on(Action::Delete, &Resource::from(&note))?;

    let plaintext = state
        .keyring
        .get(&user.claims.jti)
        .ok()
        .and_then(|key| decrypt_note(&key, &note).ok());
    let before = audit_metadata(&note, plaintext.as_deref());

    state.stores.notes.soft_delete(note.id, Utc::now()).await?;

    tracing::info!(note_id = %note.id, actor_id = %user.id, "Session note deleted");

    let snapshot = AuditSnapshot::resource(AUDIT_RESOURCE, note.id).before(before);
    Ok(ApiResponse::success(json!({ "id": note.id, "deleted": true })).audited(snapshot))
}
