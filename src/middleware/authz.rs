use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::authz::{Ability, Action, Subject};
use crate::error::ApiError;
use crate::types::Role;

/// Route guard: the caller must hold one of `roles`. Platform admins always pass.
///
/// ```ignore
/// const ADMINS: &[Role] = &[Role::Admin];
/// .route_layer(from_fn_with_state(ADMINS, require_roles))
/// ```
pub async fn require_roles(State(roles): State<&'static [Role]>, req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.has_any_role(roles) {
        tracing::warn!(user_id = %user.id, role = %user.role, path = %req.uri().path(), "Role check failed");
        return Err(ApiError::forbidden("Insufficient role for this resource"));
    }
    Ok(next.run(req).await)
}

/// Route guard: type-level ability check for `(action, subject)`.
pub async fn authorize(
    State((action, subject)): State<(Action, Subject)>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ability = req
        .extensions()
        .get::<Ability>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if let Err(err) = ability.ensure(action, subject) {
        if let Some(user) = req.extensions().get::<AuthUser>() {
            tracing::warn!(user_id = %user.id, role = %user.role, %action, %subject, "Ability check failed");
        }
        return Err(err);
    }
    Ok(next.run(req).await)
}
