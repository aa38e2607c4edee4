use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{header, request::Parts, HeaderMap},
};

use crate::error::ApiError;

/// Lowercased media type with parameters stripped, e.g. `application/vnd.api+json`.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = content_type.split(';').next()?.trim();
    (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
}

/// Same rule axum's `Json` extractor applies: `application/json` or any
/// `application/*+json`, whatever the letter case.
pub fn is_json(headers: &HeaderMap) -> bool {
    media_type(headers).map_or(false, |mime| match mime.split_once('/') {
        Some(("application", subtype)) => subtype == "json" || subtype.ends_with("+json"),
        _ => false,
    })
}

pub fn is_form(headers: &HeaderMap) -> bool {
    media_type(headers).map_or(false, |mime| mime == "application/x-www-form-urlencoded")
}

/// Buffer the whole body so it can be inspected, then rebuilt with
/// [`rebuild`].
pub async fn buffer(req: Request, limit: usize) -> Result<(Parts, Bytes), ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::payload_too_large(format!("Request body exceeds {} bytes", limit)))?;
    Ok((parts, bytes))
}

/// Reassemble a request around a (possibly rewritten) body.
pub fn rebuild(mut parts: Parts, bytes: Bytes) -> Request {
    parts.headers.insert(header::CONTENT_LENGTH, bytes.len().into());
    Request::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_type(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn json_detection_ignores_case_and_parameters() {
        for value in [
            "application/json",
            "Application/JSON; charset=utf-8",
            "application/vnd.api+json",
            "application/vnd.api+JSON",
            "APPLICATION/PROBLEM+Json ;charset=UTF-8",
        ] {
            assert!(is_json(&with_type(value)), "{}", value);
        }
        for value in ["text/json", "text/plain", "application/jsonx", "application/x-www-form-urlencoded", ""] {
            assert!(!is_json(&with_type(value)), "{}", value);
        }
        assert!(!is_json(&HeaderMap::new()));
    }

    #[test]
    fn form_detection() {
        assert!(is_form(&with_type("Application/X-WWW-Form-Urlencoded; charset=utf-8")));
        assert!(!is_form(&with_type("multipart/form-data; boundary=x")));
    }
}
