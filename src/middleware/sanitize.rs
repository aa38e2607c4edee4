use axum::{
    body::Bytes,
    extract::{Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use super::body;
use crate::error::ApiError;
use crate::security::{sanitize_str, sanitize_value};
use crate::state::AppState;

/// Scrub query values and JSON bodies before any handler sees them.
pub async fn sanitize(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let skip_fields = &state.config.audit.sanitize_skip_fields;
    let mut req = req;

    if let Some(query) = req.uri().query() {
        if let Some(cleaned) = sanitize_query(query, skip_fields) {
            let path = req.uri().path();
            let rebuilt = if cleaned.is_empty() {
                path.to_string()
            } else {
                format!("{}?{}", path, cleaned)
            };
            *req.uri_mut() = rebuilt
                .parse::<Uri>()
                .map_err(|_| ApiError::bad_request("Invalid query string"))?;
        }
    }

    if !body::is_json(req.headers()) {
        return Ok(next.run(req).await);
    }

    let (parts, bytes) = body::buffer(req, state.config.api.max_request_size_bytes).await?;
    let bytes: Bytes = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut json) => {
            let changed = sanitize_value(&mut json, skip_fields);
            if changed > 0 {
                tracing::debug!(path = %parts.uri.path(), changed, "Sanitized request body");
                serde_json::to_vec(&json)
                    .map_err(|e| ApiError::internal_server_error(format!("Failed to re-encode body: {}", e)))?
                    .into()
            } else {
                bytes
            }
        }
        // Left for the handler's extractor to reject
        Err(_) => bytes,
    };

    Ok(next.run(body::rebuild(parts, bytes)).await)
}

/// Re-encoded query string, or `None` when nothing changed.
fn sanitize_query(query: &str, skip_fields: &[String]) -> Option<String> {
    let mut changed = false;
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if skip_fields.iter().any(|f| f == name.as_ref()) {
            serializer.append_pair(&name, &value);
            continue;
        }
        let clean_name = sanitize_str(&name);
        let clean_value = sanitize_str(&value);
        changed |= clean_name != name || clean_value != value;
        if !clean_name.is_empty() {
            serializer.append_pair(&clean_name, &clean_value);
        }
    }
    changed.then(|| serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_only_rewritten_when_dirty() {
        let skip = vec!["token".to_string()];
        assert_eq!(sanitize_query("client_id=abc&limit=5", &skip), None);

        let cleaned = sanitize_query("q=%3Cscript%3Ealert(1)%3C%2Fscript%3Ehello&token=%3Cscript%3E", &skip).unwrap();
        assert_eq!(cleaned, "q=hello&token=%3Cscript%3E");
    }
}
