use axum::{
    extract::State,
    http::{header, HeaderMap, Method},
    Extension,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::audit::{persist, AuditAction, AuditRecord};
use crate::auth::{hash_password, verify_password, AuthError};
use crate::authz::{Ability, Action, Subject};
use crate::crypto::derive_key;
use crate::database::{models::user::normalize_email, UserRecord};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ClientIp};
use crate::security::{Field, Schema, ValidJson, Validate};
use crate::state::AppState;

const LOGIN_PATH: &str = "/auth/login";

// Verified against when the email is unknown so both paths cost one argon2 run.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("haven-login-timing-equalizer").ok());

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::new("email").required().email().max_len(254))
            .field(Field::new("password").required().string().max_len(1024))
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub expires_at: chrono::DateTime<Utc>,
    pub user: UserRecord,
    /// Whether this session can read and write encrypted clinical notes.
    pub phi_unlocked: bool,
}

/// POST /auth/login
///
/// Failed attempts are counted per client address and email; once the
/// counter reaches the configured limit further attempts get 429 until the
/// window slides past the oldest failure.
pub async fn login_post(
    State(state): State<AppState>,
    Extension(client_ip): Extension<ClientIp>,
    headers: HeaderMap,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let email = normalize_email(&payload.email);
    let lockout_key = format!("{}|{}", client_ip.0, email);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let attempt = |action: AuditAction, status: u16, user: Option<&UserRecord>| {
        let mut record = AuditRecord::new(action, "session", &Method::POST, LOGIN_PATH)
            .client(client_ip.0.to_string(), user_agent.clone())
            .status(status);
        if let Some(user) = user {
            record = record.actor(user.id, user.role, user.tenant_id);
            record.resource_id = Some(user.id.to_string());
        }
        record
    };

    if let Some(remaining) = state.login_failures.locked_for(&lockout_key) {
        let retry_after_secs = remaining.as_secs().max(1);
        tracing::warn!(client_ip = %client_ip.0, retry_after_secs, "Login attempt during lockout");
        persist(state.stores.audit.as_ref(), &attempt(AuditAction::LoginFailed, 429, None)).await;
        return Err(ApiError::too_many_requests(
            "Too many failed login attempts, try again later",
            retry_after_secs,
        ));
    }

    let user = state.stores.users.find_by_email(&email).await?;
    let verified = match &user {
        Some(user) if user.can_sign_in() => verify_password(&payload.password, &user.password_hash)?,
        _ => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_password(&payload.password, dummy);
            }
            false
        }
    };

    let user = match user {
        Some(user) if verified => user,
        other => {
            let failures = state.login_failures.hit(lockout_key);
            tracing::warn!(client_ip = %client_ip.0, failures, "Failed login");
            persist(
                state.stores.audit.as_ref(),
                &attempt(AuditAction::LoginFailed, 401, other.as_ref()),
            )
            .await;
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    state.login_failures.reset(&lockout_key);
    let issued = state.tokens.issue(&user)?;

    let ability = Ability::for_identity(user.id, user.tenant_id, user.role);
    let phi_unlocked = if ability.can(Action::Create, Subject::SessionNote) {
        let key = derive_key(&payload.password, &user.phi_salt)?;
        state.keyring.insert(issued.jti, key, issued.expires_at.timestamp());
        true
    } else {
        false
    };

    let now = Utc::now();
    if let Err(err) = state.stores.users.record_login(user.id, now).await {
        tracing::error!(user_id = %user.id, "Failed to record login time: {}", err);
    }

    tracing::info!(user_id = %user.id, role = %user.role, phi_unlocked, "User signed in");
    persist(state.stores.audit.as_ref(), &attempt(AuditAction::Login, 200, Some(&user))).await;

    let mut user = user;
    user.last_login_at = Some(now);

    Ok(ApiResponse::success(LoginResponse {
        token: issued.token,
        token_type: "Bearer",
        expires_in: issued.expires_in,
        expires_at: issued.expires_at,
        user,
        phi_unlocked,
    }))
}

