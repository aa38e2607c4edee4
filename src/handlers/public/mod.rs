pub mod auth;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Haven API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "health": "/health (public)",
                "login": "/auth/login (public)",
                "session": "/api/auth/* (protected)",
                "notes": "/api/notes[/:id] (protected, therapists)",
                "users": "/api/users/:id (protected)",
                "admin": "/api/admin/* (admins)"
            }
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let uptime_secs = (now - state.started_at).num_seconds();

    let database = match &state.database {
        None => Ok("memory"),
        Some(db) => db.health_check().await.map(|_| "ok"),
    };

    match database {
        Ok(database) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "uptime_secs": uptime_secs,
                    "database": database
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "uptime_secs": uptime_secs
                    }
                })),
            )
        }
    }
}
