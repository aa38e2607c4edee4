use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension,
};

use crate::audit::{AuditQuery, AuditRecord};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// GET /api/admin/audit
///
/// Practice admins only ever see their own tenant, whatever they ask for.
pub async fn audit_get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Vec<AuditRecord>> {
    let Query(mut query) = query?;

    if !user.is_platform_admin {
        let tenant_id = user
            .tenant_id
            .ok_or_else(|| ApiError::forbidden("Audit access requires a practice"))?;
        query.tenant_id = Some(tenant_id);
    }

    let records = state.stores.audit.query(&query).await?;
    Ok(ApiResponse::success(records))
}
