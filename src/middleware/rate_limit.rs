use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::client_ip::ClientIp;
use crate::error::ApiError;
use crate::security::RateDecision;
use crate::state::AppState;

/// Per-IP sliding window over every request.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.config.api.enable_rate_limiting {
        return next.run(req).await;
    }

    let client_ip = req.extensions().get::<ClientIp>().copied().unwrap_or(ClientIp::UNKNOWN);

    match state.request_limiter.check(client_ip.0) {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { limit, retry_after } => {
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            tracing::warn!(
                client_ip = %client_ip.0,
                path = %req.uri().path(),
                retry_after_secs,
                "Rate limit exceeded"
            );
            let mut response =
                ApiError::too_many_requests("Too many requests, please slow down", retry_after_secs.max(1))
                    .into_response();
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            response
        }
    }
}
