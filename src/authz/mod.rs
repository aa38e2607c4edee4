//! Authorization: role checks plus `can`/`cannot` ability rules.
//!
//! Rules are evaluated the CASL way. Later rules take priority over earlier
//! ones, so a `cannot` declared after a broad `can` carves an exception out
//! of it. Conditions are matched against the JSON attributes of a concrete
//! [`Resource`]; type-level checks ignore them.

pub mod ability;
pub mod roles;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::database::{SessionNote, UserRecord};

pub use ability::{Ability, AbilityBuilder, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Wildcard: any action.
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Wildcard: any subject.
    #[serde(rename = "all")]
    All,
    User,
    Client,
    Therapist,
    Appointment,
    SessionNote,
    TreatmentPlan,
    Message,
    Invoice,
    SupportTicket,
    AuditLog,
    SecuritySettings,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::All => "all",
            Subject::User => "User",
            Subject::Client => "Client",
            Subject::Therapist => "Therapist",
            Subject::Appointment => "Appointment",
            Subject::SessionNote => "SessionNote",
            Subject::TreatmentPlan => "TreatmentPlan",
            Subject::Message => "Message",
            Subject::Invoice => "Invoice",
            Subject::SupportTicket => "SupportTicket",
            Subject::AuditLog => "AuditLog",
            Subject::SecuritySettings => "SecuritySettings",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete object to check, described by its attributes.
#[derive(Debug, Clone)]
pub struct Resource {
    pub subject: Subject,
    pub attributes: Value,
}

impl Resource {
    pub fn new(subject: Subject, attributes: Value) -> Self {
        Self { subject, attributes }
    }

    pub fn attribute(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }
}

impl From<&SessionNote> for Resource {
    fn from(note: &SessionNote) -> Self {
        Resource::new(
            Subject::SessionNote,
            json!({
                "id": note.id,
                "tenant_id": note.tenant_id,
                "therapist_id": note.therapist_id,
                "client_id": note.client_id,
            }),
        )
    }
}

impl From<&UserRecord> for Resource {
    fn from(user: &UserRecord) -> Self {
        Resource::new(
            Subject::User,
            json!({
                "id": user.id,
                "tenant_id": user.tenant_id,
                "role": user.role,
            }),
        )
    }
}
