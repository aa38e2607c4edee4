//! HIPAA audit trail.
//!
//! Every mutating request and every PHI read produces one `AuditRecord`.
//! Records are appended through the `AuditLog` trait (Postgres or memory)
//! and mirrored onto the `audit` tracing target.
//!
//! PHI plaintext never enters a record. Handlers describe protected payloads
//! with metadata and a SHA-256 digest (see [`digest`]) and hand that over in
//! an [`AuditSnapshot`] response extension.

use async_trait::async_trait;
use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::database::StoreError;
use crate::types::Role;

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 500;
const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    LoginFailed,
    Logout,
    TokenRefresh,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Read => "read",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::TokenRefresh => "token_refresh",
        }
    }

    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::POST => AuditAction::Create,
            Method::PUT | Method::PATCH => AuditAction::Update,
            Method::DELETE => AuditAction::Delete,
            _ => AuditAction::Read,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "read" => Ok(AuditAction::Read),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "login" => Ok(AuditAction::Login),
            "login_failed" => Ok(AuditAction::LoginFailed),
            "logout" => Ok(AuditAction::Logout),
            "token_refresh" => Ok(AuditAction::TokenRefresh),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub actor_role: Option<Role>,
    pub tenant_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub ip: String,
    pub user_agent: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub phi_accessed: bool,
}

impl AuditRecord {
    pub fn new(action: AuditAction, resource_type: impl Into<String>, method: &Method, path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            actor_id: None,
            actor_role: None,
            tenant_id: None,
            action,
            resource_type: resource_type.into(),
            resource_id: None,
            method: method.to_string(),
            path: path.to_string(),
            status: 0,
            ip: String::new(),
            user_agent: None,
            before: None,
            after: None,
            phi_accessed: false,
        }
    }

    pub fn actor(mut self, id: Uuid, role: Role, tenant_id: Option<Uuid>) -> Self {
        self.actor_id = Some(id);
        self.actor_role = Some(role);
        self.tenant_id = tenant_id;
        self
    }

    pub fn client(mut self, ip: impl Into<String>, user_agent: Option<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Mirror the record onto the `audit` tracing target.
    pub fn emit(&self) {
        tracing::info!(
            target: "audit",
            audit_id = %self.id,
            action = %self.action,
            resource_type = %self.resource_type,
            resource_id = self.resource_id.as_deref().unwrap_or("-"),
            actor_id = ?self.actor_id,
            tenant_id = ?self.tenant_id,
            status = self.status,
            client_ip = %self.ip,
            phi = self.phi_accessed,
            "{} {}",
            self.method,
            self.path
        );
    }
}

/// Filters for `GET /api/admin/audit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub tenant_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub resource_type: Option<String>,
    pub action: Option<AuditAction>,
    #[serde(default)]
    pub phi_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.tenant_id.map_or(true, |t| record.tenant_id == Some(t))
            && self.actor_id.map_or(true, |a| record.actor_id == Some(a))
            && self.resource_type.as_ref().map_or(true, |r| &record.resource_type == r)
            && self.action.map_or(true, |a| record.action == a)
            && (!self.phi_only || record.phi_accessed)
            && self.since.map_or(true, |s| record.occurred_at >= s)
    }
}

/// Append-only audit storage. Queries return newest first.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Emit and persist a record. A storage failure is logged, never surfaced:
/// the request it describes has already completed.
pub async fn persist(log: &dyn AuditLog, record: &AuditRecord) {
    record.emit();
    if let Err(err) = log.append(record).await {
        tracing::error!(audit_id = %record.id, "Failed to persist audit record: {}", err);
    }
}

/// Details a handler attaches to its response for the audit layer.
/// Anything left unset falls back to what the request path implies.
#[derive(Debug, Clone, Default)]
pub struct AuditSnapshot {
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditSnapshot {
    pub fn resource(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: Some(resource_id.to_string()),
            ..Default::default()
        }
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn before(mut self, value: Value) -> Self {
        self.before = Some(value);
        self
    }

    pub fn after(mut self, value: Value) -> Self {
        self.after = Some(value);
        self
    }
}

/// Hex SHA-256 of a protected value, so reviewers can tell whether content
/// changed without the trail holding it.
pub fn digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Replace the values of sensitive keys, at any depth.
pub fn redact(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact(inner, fields);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| redact(item, fields)),
        _ => {}
    }
}

/// Resource type and id implied by a path such as `/api/notes/<id>`.
pub fn resource_from_path(path: &str) -> (String, Option<String>) {
    let mut segments = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .skip_while(|s| *s == "api");

    let resource_type = segments.next().unwrap_or("root").to_string();
    let resource_id = segments.find(|s| Uuid::parse_str(s).is_ok()).map(str::to_string);
    (resource_type, resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_follows_method() {
        assert_eq!(AuditAction::from_method(&Method::POST), AuditAction::Create);
        assert_eq!(AuditAction::from_method(&Method::PATCH), AuditAction::Update);
        assert_eq!(AuditAction::from_method(&Method::DELETE), AuditAction::Delete);
        assert_eq!(AuditAction::from_method(&Method::GET), AuditAction::Read);
        assert_eq!("login_failed".parse::<AuditAction>().unwrap(), AuditAction::LoginFailed);
    }

    #[test]
    fn redacts_nested_secrets() {
        let mut body = json!({
            "email": "a@b.co",
            "Password": "hunter2",
            "profile": { "token": "abc", "name": "A" },
            "list": [{ "password": "x" }]
        });
        redact(&mut body, &["password".to_string(), "token".to_string()]);
        assert_eq!(body["Password"], REDACTED);
        assert_eq!(body["profile"]["token"], REDACTED);
        assert_eq!(body["profile"]["name"], "A");
        assert_eq!(body["list"][0]["password"], REDACTED);
    }

    #[test]
    fn digest_is_stable_hex() {
        let d = digest("session content");
        assert_eq!(d.len(), 64);
        assert_eq!(d, digest("session content"));
        assert_ne!(d, digest("session content."));
    }

    #[test]
    fn resource_comes_from_path() {
        let id = Uuid::new_v4();
        assert_eq!(resource_from_path(&format!("/api/notes/{}", id)), ("notes".to_string(), Some(id.to_string())));
        assert_eq!(resource_from_path("/api/admin/security/blocked-ips"), ("admin".to_string(), None));
        assert_eq!(resource_from_path("/"), ("root".to_string(), None));
    }

    #[test]
    fn query_filters_and_clamps() {
        let tenant = Uuid::new_v4();
        let mut record = AuditRecord::new(AuditAction::Read, "notes", &Method::GET, "/api/notes")
            .actor(Uuid::new_v4(), Role::Therapist, Some(tenant));
        record.phi_accessed = true;

        let query = AuditQuery { tenant_id: Some(tenant), phi_only: true, ..Default::default() };
        assert!(query.matches(&record));
        let other = AuditQuery { tenant_id: Some(Uuid::new_v4()), ..Default::default() };
        assert!(!other.matches(&record));

        assert_eq!(AuditQuery { limit: Some(10_000), ..Default::default() }.effective_limit(), MAX_QUERY_LIMIT);
        assert_eq!(AuditQuery::default().effective_limit(), DEFAULT_QUERY_LIMIT);
    }
}
