use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A therapist's session note. `content` holds an `EncryptedField` in its
/// text form; the plaintext only exists inside a request that holds the
/// author's unlocked PHI key.
#[derive(Debug, Clone)]
pub struct SessionNote {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub note_type: String,
    pub session_date: DateTime<Utc>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SessionNote {
    pub const TYPES: &'static [&'static str] = &["progress", "intake", "couples", "discharge"];

    /// Associated data bound into the note's ciphertext.
    pub fn encryption_context(id: &Uuid) -> String {
        format!("session_note:{}", id)
    }
}
