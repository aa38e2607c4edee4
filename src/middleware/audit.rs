use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use super::{auth::AuthUser, body, client_ip::ClientIp};
use crate::audit::{persist, redact, resource_from_path, AuditAction, AuditRecord, AuditSnapshot};
use crate::state::AppState;

/// Audit every mutating request and every PHI read, whatever the outcome.
///
/// Sits inside `authenticate` but outside the route guards, so denied
/// attempts are recorded too. Request bodies are only kept for non-PHI
/// paths, with secrets redacted; PHI handlers describe their payloads in an
/// [`AuditSnapshot`] instead.
pub async fn audit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let audit_config = &state.config.audit;
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let mutating = matches!(method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE);
    let phi_path = audit_config.is_phi_path(&path);

    if !audit_config.enabled || !(mutating || (phi_path && method == Method::GET)) {
        return next.run(req).await;
    }

    let actor = req.extensions().get::<AuthUser>().cloned();
    let client_ip = req.extensions().get::<ClientIp>().copied().unwrap_or(ClientIp::UNKNOWN);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (req, request_body) = if mutating && !phi_path && body::is_json(req.headers()) {
        match body::buffer(req, state.config.api.max_request_size_bytes).await {
            Ok((parts, bytes)) => {
                let captured = serde_json::from_slice::<Value>(&bytes).ok().map(|mut json| {
                    redact(&mut json, &audit_config.sanitize_skip_fields);
                    json
                });
                (body::rebuild(parts, bytes), captured)
            }
            Err(err) => return err.into_response(),
        }
    } else {
        (req, None)
    };

    let response = next.run(req).await;

    let snapshot = response.extensions().get::<AuditSnapshot>().cloned().unwrap_or_default();
    let (path_resource, path_resource_id) = resource_from_path(&path);
    let action = snapshot.action.unwrap_or_else(|| AuditAction::from_method(&method));

    let mut record = AuditRecord::new(action, snapshot.resource_type.unwrap_or(path_resource), &method, &path)
        .client(client_ip.0.to_string(), user_agent)
        .status(response.status().as_u16());
    if let Some(user) = &actor {
        record = record.actor(user.id, user.role, user.tenant_id);
    }
    record.resource_id = snapshot.resource_id.or(path_resource_id);
    record.before = snapshot.before;
    record.after = if phi_path { snapshot.after } else { snapshot.after.or(request_body) };
    record.phi_accessed = phi_path;

    persist(state.stores.audit.as_ref(), &record).await;

    response
}
