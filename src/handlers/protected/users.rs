use axum::{
    extract::{rejection::PathRejection, Path, State},
    Extension,
};
use serde_json::Value;
use uuid::Uuid;

use crate::authz::{Ability, Action, Resource};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /api/users/:id
///
/// Instance-checked, then trimmed to the fields the caller may read.
pub async fn user_get(
    State(state): State<AppState>,
    Extension(ability): Extension<Ability>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;
    let user = state
        .stores
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", id)))?;

    let resource = Resource::from(&user);
    ability.ensure_on(Action::Read, &resource)?;

    let mut body = serde_json::to_value(&user)
        .map_err(|e| ApiError::internal_server_error(format!("Failed to serialize user: {}", e)))?;
    ability.filter_fields(Action::Read, &resource, &mut body);

    Ok(ApiResponse::success(body))
}
