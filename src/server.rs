use axum::{
    http::{header, HeaderName, HeaderValue, Method, Uri},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::authz::{Action, Subject};
use crate::config::SecurityConfig;
use crate::error::ApiError;
use crate::handlers::{elevated, protected, public};
use crate::middleware::{
    audit, authenticate, authorize, ip_guard, rate_limit, require_roles, sanitize, security_headers, threat_scan,
};
use crate::state::AppState;
use crate::types::Role;

const THERAPISTS: &[Role] = &[Role::Therapist];
const ADMINS: &[Role] = &[Role::Admin];

/// The full application: routes plus the security pipeline documented in
/// [`crate::middleware`].
pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(auth_public_routes())
        .layer(from_fn_with_state(state.clone(), sanitize));

    // Layers wrap outward: authenticate runs first, audit last before the guards
    let protected = Router::new()
        .merge(auth_routes())
        .merge(note_routes())
        .merge(user_routes())
        .merge(admin_routes())
        .layer(from_fn_with_state(state.clone(), audit))
        .layer(from_fn_with_state(state.clone(), sanitize))
        .layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .merge(public)
        .merge(protected)
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(state.config.api.max_request_size_bytes))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn_with_state(state.clone(), threat_scan))
        .layer(from_fn_with_state(state.clone(), ip_guard))
        .layer(from_fn_with_state(state.clone(), security_headers))
        .layer(cors_layer(&state.config.security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    Router::new().route("/auth/login", post(public::auth::login_post))
}

fn auth_routes() -> Router<AppState> {
    use protected::auth;

    Router::new()
        .route("/api/auth/whoami", get(auth::whoami_get))
        .route("/api/auth/ability", get(auth::ability_get))
        .route("/api/auth/refresh", post(auth::refresh_post))
        .route("/api/auth/logout", post(auth::logout_post))
}

fn note_routes() -> Router<AppState> {
    use protected::notes;

    Router::new()
        .route("/api/notes", get(notes::notes_get).post(notes::note_post))
        .route(
            "/api/notes/:id",
            get(notes::note_get).put(notes::note_put).delete(notes::note_delete),
        )
        .route_layer(from_fn_with_state(THERAPISTS, require_roles))
}

fn user_routes() -> Router<AppState> {
    Router::new().route("/api/users/:id", get(protected::users::user_get))
}

fn admin_routes() -> Router<AppState> {
    use elevated::{audit, security};

    let audit_routes = Router::new()
        .route("/api/admin/audit", get(audit::audit_get))
        .route_layer(from_fn_with_state((Action::Read, Subject::AuditLog), authorize));

    let security_routes = Router::new()
        .route("/api/admin/security/threats", get(security::threats_get))
        .route(
            "/api/admin/security/blocked-ips",
            get(security::blocked_ips_get).post(security::blocked_ips_post),
        )
        .route("/api/admin/security/blocked-ips/:ip", delete(security::blocked_ip_delete))
        .route_layer(from_fn_with_state((Action::Read, Subject::SecuritySettings), authorize));

    Router::new()
        .merge(audit_routes)
        .merge(security_routes)
        .route_layer(from_fn_with_state(ADMINS, require_roles))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

fn cors_layer(config: &SecurityConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(600))
}
