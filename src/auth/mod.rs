pub mod password;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::database::UserRecord;
use crate::types::Role;

pub use password::{hash_password, verify_password};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,
    #[error("Authorization header must use Bearer token format")]
    MalformedHeader,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Token has been revoked")]
    Revoked,
    #[error("Unknown user")]
    UnknownUser,
    #[error("User is inactive")]
    InactiveUser,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Token signing failed: {0}")]
    Signing(String),
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role: Role,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

/// Signs and verifies HS256 access tokens and remembers revoked token ids
/// until they would have expired anyway.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    lifetime: Duration,
    revoked: DashMap<Uuid, i64>,
}

impl TokenService {
    pub fn new(config: &SecurityConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer.clone(),
            lifetime: Duration::hours(config.jwt_expiry_hours.max(1) as i64),
            revoked: DashMap::new(),
        }
    }

    pub fn issue(&self, user: &UserRecord) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.lifetime;
        let claims = Claims {
            sub: user.id,
            tenant_id: user.tenant_id,
            role: user.role,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
            expires_in: self.lifetime.num_seconds(),
        })
    }

    /// Check signature, issuer, expiry and revocation.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if self.is_revoked(&data.claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(data.claims)
    }

    pub fn revoke(&self, claims: &Claims) {
        self.revoked.insert(claims.jti, claims.exp);
    }

    pub fn is_revoked(&self, jti: &Uuid) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Forget revocations for tokens that have expired on their own.
    pub fn purge_revoked(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > now);
        before.saturating_sub(self.revoked.len())
    }
}

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::MalformedHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use secrecy::SecretString;

    fn user(role: Role) -> UserRecord {
        UserRecord::new(
            Some(Uuid::new_v4()),
            "pat@example.com",
            "$argon2id$placeholder",
            role,
            "Pat",
            "Lee",
        )
    }

    #[test]
    fn issued_token_verifies() {
        let service = TokenService::new(&AppConfig::development().security);
        let therapist = user(Role::Therapist);
        let issued = service.issue(&therapist).unwrap();

        let claims = service.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, therapist.id);
        assert_eq!(claims.role, Role::Therapist);
        assert_eq!(claims.tenant_id, therapist.tenant_id);
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn rejects_foreign_signature_and_issuer() {
        let ours = TokenService::new(&AppConfig::development().security);

        let mut other_config = AppConfig::development().security;
        other_config.jwt_secret = SecretString::from("another-secret-entirely".to_string());
        let foreign = TokenService::new(&other_config);
        let token = foreign.issue(&user(Role::Admin)).unwrap().token;
        assert!(matches!(ours.verify(&token), Err(AuthError::InvalidToken(_))));

        let mut other_issuer = AppConfig::development().security;
        other_issuer.jwt_issuer = "someone-else".to_string();
        let token = TokenService::new(&other_issuer).issue(&user(Role::Admin)).unwrap().token;
        assert!(matches!(ours.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_expired_token() {
        let service = TokenService::new(&AppConfig::development().security);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            tenant_id: None,
            role: Role::Client,
            jti: Uuid::new_v4(),
            iat: now - 7200,
            exp: now - 3600,
            iss: "haven-api".to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &service.encoding).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn revoked_token_is_rejected() {
        let service = TokenService::new(&AppConfig::development().security);
        let issued = service.issue(&user(Role::Client)).unwrap();
        let claims = service.verify(&issued.token).unwrap();
        service.revoke(&claims);
        assert!(matches!(service.verify(&issued.token), Err(AuthError::Revoked)));
        // Still live, so purge keeps it
        assert_eq!(service.purge_revoked(), 0);
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(Some("Basic xyz")), Err(AuthError::MalformedHeader)));
        assert!(matches!(bearer_token(Some("Bearer   ")), Err(AuthError::MalformedHeader)));
    }
}
