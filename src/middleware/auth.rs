use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use uuid::Uuid;

use super::client_ip::ClientIp;
use crate::auth::{bearer_token, AuthError, Claims};
use crate::authz::Ability;
use crate::database::UserRecord;
use crate::error::ApiError;
use crate::state::AppState;
use crate::types::Role;

/// Normalized identity of the caller, loaded fresh from the users table on
/// every request.
#[derive(Clone, Debug, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_client: bool,
    pub is_therapist: bool,
    pub is_admin: bool,
    pub is_support: bool,
    pub is_platform_admin: bool,
    #[serde(skip)]
    pub claims: Claims,
}

impl AuthUser {
    pub fn from_user(user: &UserRecord, claims: Claims) -> Self {
        Self {
            id: user.id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            is_client: user.role == Role::Client,
            is_therapist: user.role == Role::Therapist,
            is_admin: user.role == Role::Admin,
            is_support: user.role == Role::Support,
            is_platform_admin: user.role == Role::PlatformAdmin,
            claims,
        }
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.is_platform_admin || roles.contains(&self.role)
    }
}

/// Bearer token authentication. Inserts `AuthUser` and the caller's `Ability`.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let client_ip = req.extensions().get::<ClientIp>().copied().unwrap_or(ClientIp::UNKNOWN);
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let claims = bearer_token(header_value)
        .and_then(|token| state.tokens.verify(token))
        .map_err(|err| {
            tracing::debug!(client_ip = %client_ip.0, path = %req.uri().path(), "Authentication failed: {}", err);
            err
        })?;

    let user = state
        .stores
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    if !user.can_sign_in() {
        tracing::warn!(client_ip = %client_ip.0, user_id = %user.id, "Token presented for inactive user");
        return Err(AuthError::InactiveUser.into());
    }

    let auth_user = AuthUser::from_user(&user, claims);
    let ability = Ability::for_user(&auth_user);
    req.extensions_mut().insert(auth_user);
    req.extensions_mut().insert(ability);

    Ok(next.run(req).await)
}
