use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use super::{body, client_ip::ClientIp};
use crate::error::ApiError;
use crate::security::{scan_json, scan_text, ThreatMatch};
use crate::state::AppState;

/// Signature scan of path, query and body, whatever its content type.
///
/// Every hit is logged and fed to the threat monitor. The request is only
/// rejected when `threat.block_requests` is on.
pub async fn threat_scan(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let threat = &state.config.threat;
    if !threat.enable_scanning {
        return Ok(next.run(req).await);
    }

    let skip_fields = &state.config.audit.sanitize_skip_fields;
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client_ip = req.extensions().get::<ClientIp>().copied().unwrap_or(ClientIp::UNKNOWN);

    let mut matches: Vec<ThreatMatch> = scan_text(&path, "path");
    if let Some(query) = req.uri().query() {
        matches.extend(scan_form(query.as_bytes(), "query", skip_fields));
    }

    let (parts, bytes) = body::buffer(req, state.config.api.max_request_size_bytes).await?;
    if !bytes.is_empty() {
        matches.extend(scan_body(&parts.headers, &bytes, skip_fields));
    }
    let req = body::rebuild(parts, bytes);

    if matches.is_empty() {
        return Ok(next.run(req).await);
    }

    let blocked = threat.block_requests;
    let categories: Vec<String> = matches.iter().map(|m| m.category.to_string()).collect();
    let locations: Vec<&str> = matches.iter().map(|m| m.location.as_str()).collect();
    tracing::warn!(
        client_ip = %client_ip.0,
        method = %method,
        path = %path,
        categories = ?categories,
        locations = ?locations,
        blocked,
        "Threat signature matched"
    );

    state
        .threats
        .record(&state.blocklist, client_ip.0, &method, &path, matches, blocked);

    if blocked {
        return Err(ApiError::bad_request("Request rejected by security policy"));
    }
    Ok(next.run(req).await)
}

/// JSON is walked field by field and form bodies pair by pair, so skipped
/// fields stay unscanned. Anything else is scanned as raw text.
fn scan_body(headers: &HeaderMap, bytes: &[u8], skip_fields: &[String]) -> Vec<ThreatMatch> {
    if body::is_json(headers) {
        if let Ok(json) = serde_json::from_slice::<Value>(bytes) {
            return scan_json(&json, "body", skip_fields);
        }
    } else if body::is_form(headers) {
        return scan_form(bytes, "body", skip_fields);
    }
    scan_text(&String::from_utf8_lossy(bytes), "body")
}

fn scan_form(input: &[u8], prefix: &str, skip_fields: &[String]) -> Vec<ThreatMatch> {
    let mut matches = Vec::new();
    for (name, value) in url::form_urlencoded::parse(input) {
        if skip_fields.iter().any(|f| f.eq_ignore_ascii_case(&name)) {
            continue;
        }
        let location = format!("{}.{}", prefix, name);
        matches.extend(scan_text(&name, &location));
        matches.extend(scan_text(&value, &location));
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    fn headers(content_type: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn every_body_type_is_scanned() {
        let skip = vec!["password".to_string()];

        let json = br#"{"note":"<script>alert(1)</script>","password":"' OR 1=1 --"}"#;
        let hits = scan_body(&headers(Some("application/vnd.api+JSON")), json, &skip);
        assert!(hits.iter().any(|m| m.location == "body.note"));
        assert!(hits.iter().all(|m| m.location != "body.password"));

        let form = b"q=%27%20OR%201%3D1%20--&Password=%27%20OR%201%3D1%20--";
        let hits = scan_body(&headers(Some("application/x-www-form-urlencoded")), form, &skip);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|m| m.location == "body.q"));

        for content_type in [Some("text/plain"), None] {
            let hits = scan_body(&headers(content_type), b"<script>alert(1)</script>", &skip);
            assert!(hits.iter().any(|m| m.location == "body"), "{:?}", content_type);
        }
    }
}
