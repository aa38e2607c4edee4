use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use super::client_ip::resolve_client_ip;
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the caller's address and turn away blocked clients before any
/// other work is done for them.
pub async fn ip_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let client_ip = resolve_client_ip(
        req.headers(),
        req.extensions().get::<ConnectInfo<SocketAddr>>(),
        state.config.api.trust_proxy,
    );

    if let Some(entry) = state.blocklist.is_blocked(&client_ip.0) {
        tracing::warn!(
            client_ip = %client_ip.0,
            source = ?entry.source,
            path = %req.uri().path(),
            "Request from blocked client rejected"
        );
        return Err(ApiError::forbidden("Access denied"));
    }

    req.extensions_mut().insert(client_ip);
    Ok(next.run(req).await)
}
