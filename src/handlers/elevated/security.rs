use axum::{
    extract::{rejection::PathRejection, rejection::QueryRejection, Path, Query, State},
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::time::Duration;

use crate::audit::AuditSnapshot;
use crate::authz::{Ability, Action, Subject};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::security::{BlockEntry, Field, Schema, ThreatEvent, ValidJson, Validate};
use crate::state::AppState;

const DEFAULT_THREAT_LIMIT: usize = 50;
const MAX_THREAT_LIMIT: usize = 1000;
/// One year, the longest temporary block accepted through the API.
const MAX_BLOCK_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct ThreatQuery {
    pub limit: Option<usize>,
}

/// GET /api/admin/security/threats
pub async fn threats_get(
    State(state): State<AppState>,
    query: Result<Query<ThreatQuery>, QueryRejection>,
) -> ApiResult<Vec<ThreatEvent>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_THREAT_LIMIT).clamp(1, MAX_THREAT_LIMIT);
    Ok(ApiResponse::success(state.threats.recent(limit)))
}

/// GET /api/admin/security/blocked-ips
pub async fn blocked_ips_get(State(state): State<AppState>) -> ApiResult<Vec<BlockEntry>> {
    Ok(ApiResponse::success(state.blocklist.list()))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: IpAddr,
    pub reason: String,
    /// Omit for a permanent block.
    pub duration_secs: Option<u64>,
}

impl Validate for BlockRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::new("ip").required().string().max_len(64))
            .field(Field::new("reason").required().string().no_html().max_len(500))
            .field(Field::new("duration_secs").optional().integer(Some(1), Some(MAX_BLOCK_SECS)))
    }
}

/// POST /api/admin/security/blocked-ips
pub async fn blocked_ips_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    ValidJson(payload): ValidJson<BlockRequest>,
) -> ApiResult<BlockEntry> {
    ability.ensure(Action::Manage, Subject::SecuritySettings)?;

    let entry = state.blocklist.block(
        payload.ip,
        payload.reason,
        payload.duration_secs.map(Duration::from_secs),
    );
    tracing::warn!(client_ip = %entry.ip, actor_id = %user.id, expires_at = ?entry.expires_at, "IP blocked by operator");

    let snapshot = AuditSnapshot::resource("blocked_ip", entry.ip).after(json!({
        "reason": entry.reason,
        "expires_at": entry.expires_at,
    }));
    Ok(ApiResponse::created(entry).audited(snapshot))
}

/// DELETE /api/admin/security/blocked-ips/:ip
pub async fn blocked_ip_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(ability): Extension<Ability>,
    path: Result<Path<IpAddr>, PathRejection>,
) -> ApiResult<Value> {
    ability.ensure(Action::Manage, Subject::SecuritySettings)?;
    let Path(ip) = path?;

    let entry = state
        .blocklist
        .unblock(&ip)
        .ok_or_else(|| ApiError::not_found(format!("{} is not blocked", ip)))?;
    tracing::warn!(client_ip = %ip, actor_id = %user.id, "IP unblocked by operator");

    let snapshot = AuditSnapshot::resource("blocked_ip", ip).before(json!({
        "reason": entry.reason,
        "source": entry.source,
        "expires_at": entry.expires_at,
    }));
    Ok(ApiResponse::success(json!({ "ip": ip, "unblocked": true })).audited(snapshot))
}
