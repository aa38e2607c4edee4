use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::crypto::generate_salt;
use crate::types::Role;

/// A row of the `users` table. Credentials never serialize.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    /// `None` only for platform admins, who sit above every practice.
    pub tenant_id: Option<Uuid>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    /// Salt for the PHI key derivation (base64url).
    #[serde(skip_serializing)]
    pub phi_salt: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(
        tenant_id: Option<Uuid>,
        email: &str,
        password_hash: &str,
        role: Role,
        first_name: &str,
        last_name: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            email: normalize_email(email),
            password_hash: password_hash.to_string(),
            role,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            is_active: true,
            phi_salt: generate_salt(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn can_sign_in(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_active_with_fresh_salt() {
        let a = UserRecord::new(None, "  Dana@Example.COM ", "hash", Role::PlatformAdmin, "Dana", "Ortiz");
        let b = UserRecord::new(None, "other@example.com", "hash", Role::Client, "Lee", "Ng");
        assert_eq!(a.email, "dana@example.com");
        assert!(a.can_sign_in());
        assert_ne!(a.phi_salt, b.phi_salt);
    }

    #[test]
    fn credentials_do_not_serialize() {
        let user = UserRecord::new(None, "x@example.com", "$argon2id$secret", Role::Client, "X", "Y");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("phi_salt").is_none());
        assert_eq!(json["role"], "client");
    }
}
