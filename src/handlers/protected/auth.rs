use axum::{extract::State, Extension};
use serde::Serialize;
use serde_json::{json, Value};

use crate::audit::{AuditAction, AuditSnapshot};
use crate::auth::AuthError;
use crate::authz::{Ability, Rule};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;
use crate::types::Role;

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    #[serde(flatten)]
    pub user: AuthUser,
    pub phi_unlocked: bool,
    pub token_expires_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/auth/whoami
pub async fn whoami_get(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<WhoAmI> {
    let phi_unlocked = state.keyring.get(&user.claims.jti).is_ok();
    let token_expires_at = user.claims.expires_at();
    Ok(ApiResponse::success(WhoAmI {
        user,
        phi_unlocked,
        token_expires_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct AbilityExport {
    pub role: Role,
    pub rules: Vec<Rule>,
}

/// GET /api/auth/ability
///
/// The caller's rules in a form client UIs can evaluate for gating.
pub async fn ability_get(
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
) -> ApiResult<AbilityExport> {
    Ok(ApiResponse::success(AbilityExport {
        role: user.role,
        rules: ability.rules().to_vec(),
    }))
}

/// POST /api/auth/refresh
///
/// Issues a new token from the current user row, revokes the presented one
/// and moves an unlocked PHI key to the new session.
pub async fn refresh_post(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Value> {
    let record = state
        .stores
        .users
        .find_by_id(user.id)
        .await?
        .filter(|u| u.can_sign_in())
        .ok_or(AuthError::InactiveUser)?;

    let issued = state.tokens.issue(&record)?;
    state.tokens.revoke(&user.claims);
    let phi_unlocked = state
        .keyring
        .transfer(&user.claims.jti, issued.jti, issued.expires_at.timestamp());

    tracing::info!(user_id = %user.id, phi_unlocked, "Token refreshed");

    let snapshot = AuditSnapshot::resource("session", user.id).action(AuditAction::TokenRefresh);
    Ok(ApiResponse::success(json!({
        "token": issued.token,
        "token_type": "Bearer",
        "expires_in": issued.expires_in,
        "expires_at": issued.expires_at,
        "phi_unlocked": phi_unlocked
    }))
    .audited(snapshot))
}

/// POST /api/auth/logout
pub async fn logout_post(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<Value> {
    state.tokens.revoke(&user.claims);
    let phi_locked = state.keyring.remove(&user.claims.jti);

    tracing::info!(user_id = %user.id, phi_locked, "User signed out");

    let snapshot = AuditSnapshot::resource("session", user.id).action(AuditAction::Logout);
    Ok(ApiResponse::success(json!({ "logged_out": true })).audited(snapshot))
}
