//! Declarative per-route request validation.
//!
//! A `Schema` is a list of field chains, built the way route validators are
//! usually declared:
//!
//! ```ignore
//! Schema::new()
//!     .field(Field::new("email").required().email().max_len(254))
//!     .field(Field::new("password").required().string().min_len(8))
//! ```
//!
//! Only the first failing rule is reported per field.

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ApiError;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@<>]+@[^\s@<>]+\.[^\s@<>]{2,}$").expect("valid regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*/?\s*[a-zA-Z][^>]*>").expect("valid regex"));

#[derive(Debug, Clone)]
enum Rule {
    String,
    Email,
    Uuid,
    MinLen(usize),
    MaxLen(usize),
    OneOf(&'static [&'static str]),
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    NoHtml,
}

#[derive(Debug, Clone)]
pub struct Field {
    name: &'static str,
    required: bool,
    rules: Vec<Rule>,
}

impl Field {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            rules: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Absent or null values pass; present values still run every rule.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn string(mut self) -> Self {
        self.rules.push(Rule::String);
        self
    }

    pub fn email(mut self) -> Self {
        self.rules.push(Rule::Email);
        self
    }

    pub fn uuid(mut self) -> Self {
        self.rules.push(Rule::Uuid);
        self
    }

    pub fn min_len(mut self, n: usize) -> Self {
        self.rules.push(Rule::MinLen(n));
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        self.rules.push(Rule::MaxLen(n));
        self
    }

    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.rules.push(Rule::OneOf(allowed));
        self
    }

    pub fn integer(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.rules.push(Rule::Integer { min, max });
        self
    }

    pub fn boolean(mut self) -> Self {
        self.rules.push(Rule::Boolean);
        self
    }

    pub fn no_html(mut self) -> Self {
        self.rules.push(Rule::NoHtml);
        self
    }

    fn check(&self, value: Option<&Value>) -> Result<(), String> {
        let value = match value {
            None | Some(Value::Null) => {
                return if self.required {
                    Err("This field is required".to_string())
                } else {
                    Ok(())
                };
            }
            Some(v) => v,
        };

        if self.required {
            if let Value::String(s) = value {
                if s.trim().is_empty() {
                    return Err("This field is required".to_string());
                }
            }
        }

        for rule in &self.rules {
            check_rule(rule, value)?;
        }
        Ok(())
    }
}

fn check_rule(rule: &Rule, value: &Value) -> Result<(), String> {
    match rule {
        Rule::String => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| "Must be a string".to_string()),
        Rule::Email => match value.as_str() {
            Some(s) if EMAIL.is_match(s) => Ok(()),
            _ => Err("Must be a valid email address".to_string()),
        },
        Rule::Uuid => match value.as_str().map(Uuid::parse_str) {
            Some(Ok(_)) => Ok(()),
            _ => Err("Must be a valid UUID".to_string()),
        },
        Rule::MinLen(n) => match value.as_str() {
            Some(s) if s.chars().count() >= *n => Ok(()),
            Some(_) => Err(format!("Must be at least {} characters", n)),
            None => Err("Must be a string".to_string()),
        },
        Rule::MaxLen(n) => match value.as_str() {
            Some(s) if s.chars().count() <= *n => Ok(()),
            Some(_) => Err(format!("Must be at most {} characters", n)),
            None => Err("Must be a string".to_string()),
        },
        Rule::OneOf(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => Ok(()),
            _ => Err(format!("Must be one of: {}", allowed.join(", "))),
        },
        Rule::Integer { min, max } => {
            let n = value.as_i64().ok_or_else(|| "Must be an integer".to_string())?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("Must be at least {}", min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("Must be at most {}", max));
                }
            }
            Ok(())
        }
        Rule::Boolean => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| "Must be true or false".to_string()),
        Rule::NoHtml => match value.as_str() {
            Some(s) if HTML_TAG.is_match(s) => Err("Must not contain HTML".to_string()),
            _ => Ok(()),
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn validate(&self, body: &Value) -> Result<(), ApiError> {
        let object = body
            .as_object()
            .ok_or_else(|| ApiError::bad_request("Request body must be a JSON object"))?;

        let field_errors: HashMap<String, String> = self
            .fields
            .iter()
            .filter_map(|field| {
                field
                    .check(object.get(field.name))
                    .err()
                    .map(|msg| (field.name.to_string(), msg))
            })
            .collect();

        if field_errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation_error("Invalid request", Some(field_errors)))
        }
    }
}

/// Request payloads that declare their own validation schema.
pub trait Validate {
    fn schema() -> Schema;
}

/// JSON extractor that validates against `T::schema()` before deserializing.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::invalid_json(rejection.body_text()))?;

        T::schema().validate(&value)?;

        let payload = serde_json::from_value(value)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?;
        Ok(ValidJson(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_errors(err: ApiError) -> HashMap<String, String> {
        match err {
            ApiError::ValidationError { field_errors: Some(errors), .. } => errors,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn login_schema() -> Schema {
        Schema::new()
            .field(Field::new("email").required().email().max_len(254))
            .field(Field::new("password").required().string().min_len(8))
            .field(Field::new("remember").optional().boolean())
    }

    #[test]
    fn accepts_valid_body() {
        let body = json!({ "email": "sam@example.com", "password": "correct horse" });
        assert!(login_schema().validate(&body).is_ok());
    }

    #[test]
    fn reports_first_error_per_field() {
        let body = json!({ "email": "not-an-email", "password": "short", "remember": "yes" });
        let errors = field_errors(login_schema().validate(&body).unwrap_err());
        assert_eq!(errors["email"], "Must be a valid email address");
        assert_eq!(errors["password"], "Must be at least 8 characters");
        assert_eq!(errors["remember"], "Must be true or false");
    }

    #[test]
    fn required_rejects_missing_and_blank() {
        let errors = field_errors(login_schema().validate(&json!({ "email": "   " })).unwrap_err());
        assert_eq!(errors["email"], "This field is required");
        assert_eq!(errors["password"], "This field is required");
        assert!(!errors.contains_key("remember"));
    }

    #[test]
    fn other_rules() {
        let schema = Schema::new()
            .field(Field::new("client_id").required().uuid())
            .field(Field::new("kind").required().one_of(&["individual", "couple"]))
            .field(Field::new("minutes").optional().integer(Some(15), Some(180)))
            .field(Field::new("title").optional().no_html());

        let ok = json!({ "client_id": Uuid::new_v4().to_string(), "kind": "couple", "minutes": 50 });
        assert!(schema.validate(&ok).is_ok());

        let bad = json!({ "client_id": "123", "kind": "group", "minutes": 5, "title": "<b>hi</b>" });
        let errors = field_errors(schema.validate(&bad).unwrap_err());
        assert_eq!(errors.len(), 4);
        assert_eq!(errors["minutes"], "Must be at least 15");
    }

    #[test]
    fn non_object_body_is_bad_request() {
        let err = login_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }
}
