use serde::Serialize;
use serde_json::{Map, Value};

use super::{Action, Resource, Subject};
use crate::error::ApiError;

/// One `can` or `cannot` grant. Serializes in the shape clients expect for
/// their own UI gating (`GET /api/auth/ability`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub action: Action,
    pub subject: Subject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inverted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Rule {
    fn new(action: Action, subject: Subject, inverted: bool) -> Self {
        Self {
            action,
            subject,
            conditions: None,
            fields: None,
            inverted,
            reason: None,
        }
    }

    fn applies_to(&self, action: Action, subject: Subject) -> bool {
        (self.action == Action::Manage || self.action == action)
            && (self.subject == Subject::All || self.subject == subject)
    }

    /// Without a concrete resource only unconditional rules can deny, while
    /// conditional grants still count as "possible".
    fn matches_conditions(&self, resource: Option<&Resource>) -> bool {
        let conditions = match &self.conditions {
            None => return true,
            Some(c) => c,
        };
        let resource = match resource {
            None => return !self.inverted,
            Some(r) => r,
        };
        conditions
            .iter()
            .all(|(key, expected)| condition_holds(resource.attribute(key), expected))
    }

    fn matches_field(&self, field: Option<&str>) -> bool {
        match (&self.fields, field) {
            (None, _) => true,
            (Some(_), None) => !self.inverted,
            (Some(fields), Some(field)) => fields.iter().any(|f| f == field),
        }
    }
}

/// Equality, or one of the `$in` / `$ne` / `$eq` operators.
fn condition_holds(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
            ops.iter().all(|(op, operand)| match op.as_str() {
                "$in" => operand.as_array().map_or(false, |items| items.contains(actual)),
                "$ne" => actual != operand,
                "$eq" => actual == operand,
                _ => false,
            })
        }
        _ => actual == expected,
    }
}

/// Handle returned by `AbilityBuilder::can`/`cannot` to refine the rule.
pub struct RuleBuilder<'a>(&'a mut Rule);

impl RuleBuilder<'_> {
    /// Conditions as a JSON object; anything else is ignored.
    pub fn when(self, conditions: Value) -> Self {
        if let Value::Object(map) = conditions {
            self.0.conditions = Some(map);
        }
        self
    }

    pub fn fields(self, fields: &[&str]) -> Self {
        self.0.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn because(self, reason: impl Into<String>) -> Self {
        self.0.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct AbilityBuilder {
    rules: Vec<Rule>,
}

impl AbilityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can(&mut self, action: Action, subject: Subject) -> RuleBuilder<'_> {
        self.push(Rule::new(action, subject, false))
    }

    pub fn cannot(&mut self, action: Action, subject: Subject) -> RuleBuilder<'_> {
        self.push(Rule::new(action, subject, true))
    }

    fn push(&mut self, rule: Rule) -> RuleBuilder<'_> {
        self.rules.push(rule);
        let last = self.rules.len() - 1;
        RuleBuilder(&mut self.rules[last])
    }

    pub fn build(self) -> Ability {
        Ability { rules: self.rules }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules for `(action, subject)`, highest priority first.
    fn relevant(&self, action: Action, subject: Subject) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .rev()
            .filter(move |rule| rule.applies_to(action, subject))
    }

    fn decide(&self, action: Action, subject: Subject, resource: Option<&Resource>, field: Option<&str>) -> Option<&Rule> {
        self.relevant(action, subject)
            .find(|rule| rule.matches_conditions(resource) && rule.matches_field(field))
    }

    /// Type-level check: could this user perform `action` on some `subject`?
    pub fn can(&self, action: Action, subject: Subject) -> bool {
        self.decide(action, subject, None, None)
            .map_or(false, |rule| !rule.inverted)
    }

    pub fn cannot(&self, action: Action, subject: Subject) -> bool {
        !self.can(action, subject)
    }

    /// Instance-level check; conditions are evaluated against the resource.
    pub fn can_on(&self, action: Action, resource: &Resource) -> bool {
        self.decide(action, resource.subject, Some(resource), None)
            .map_or(false, |rule| !rule.inverted)
    }

    pub fn can_field(&self, action: Action, resource: &Resource, field: &str) -> bool {
        self.decide(action, resource.subject, Some(resource), Some(field))
            .map_or(false, |rule| !rule.inverted)
    }

    /// Drop the top-level keys of `value` this ability may not `action`.
    pub fn filter_fields(&self, action: Action, resource: &Resource, value: &mut Value) {
        if let Value::Object(map) = value {
            map.retain(|key, _| self.can_field(action, resource, key));
        }
    }

    pub fn ensure(&self, action: Action, subject: Subject) -> Result<(), ApiError> {
        match self.decide(action, subject, None, None) {
            Some(rule) if !rule.inverted => Ok(()),
            denied => Err(forbidden(action, subject, denied)),
        }
    }

    pub fn ensure_on(&self, action: Action, resource: &Resource) -> Result<(), ApiError> {
        match self.decide(action, resource.subject, Some(resource), None) {
            Some(rule) if !rule.inverted => Ok(()),
            denied => Err(forbidden(action, resource.subject, denied)),
        }
    }
}

fn forbidden(action: Action, subject: Subject, rule: Option<&Rule>) -> ApiError {
    match rule.and_then(|r| r.reason.as_deref()) {
        Some(reason) => ApiError::forbidden(reason),
        None => ApiError::forbidden(format!("You are not allowed to {} {}", action, subject)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(therapist: &str, client: &str) -> Resource {
        Resource::new(Subject::SessionNote, json!({ "therapist_id": therapist, "client_id": client }))
    }

    #[test]
    fn later_rules_win() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Manage, Subject::All);
        b.cannot(Action::Delete, Subject::AuditLog).because("Audit logs are immutable");
        let ability = b.build();

        assert!(ability.can(Action::Read, Subject::AuditLog));
        assert!(ability.cannot(Action::Delete, Subject::AuditLog));
        let err = ability.ensure(Action::Delete, Subject::AuditLog).unwrap_err();
        assert_eq!(err.message(), "Audit logs are immutable");

        // Reversed order: the broad grant overrides the exception
        let mut b = AbilityBuilder::new();
        b.cannot(Action::Delete, Subject::AuditLog);
        b.can(Action::Manage, Subject::All);
        assert!(b.build().can(Action::Delete, Subject::AuditLog));
    }

    #[test]
    fn conditions_only_bind_instances() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Read, Subject::SessionNote).when(json!({ "therapist_id": "t1" }));
        let ability = b.build();

        assert!(ability.can(Action::Read, Subject::SessionNote));
        assert!(ability.can_on(Action::Read, &note("t1", "c1")));
        assert!(!ability.can_on(Action::Read, &note("t2", "c1")));
        assert!(!ability.can_on(Action::Update, &note("t1", "c1")));
    }

    #[test]
    fn conditional_cannot_does_not_deny_type_level() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Read, Subject::SessionNote);
        b.cannot(Action::Read, Subject::SessionNote).when(json!({ "client_id": "c9" }));
        let ability = b.build();

        assert!(ability.can(Action::Read, Subject::SessionNote));
        assert!(ability.can_on(Action::Read, &note("t1", "c1")));
        assert!(!ability.can_on(Action::Read, &note("t1", "c9")));
    }

    #[test]
    fn in_and_ne_operators() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Read, Subject::SessionNote)
            .when(json!({ "client_id": { "$in": ["c1", "c2"] }, "therapist_id": { "$ne": "t0" } }));
        let ability = b.build();

        assert!(ability.can_on(Action::Read, &note("t1", "c2")));
        assert!(!ability.can_on(Action::Read, &note("t1", "c3")));
        assert!(!ability.can_on(Action::Read, &note("t0", "c1")));
    }

    #[test]
    fn field_restrictions() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Read, Subject::User).fields(&["id", "email"]);
        let ability = b.build();
        let user = Resource::new(Subject::User, json!({ "id": "u1" }));

        assert!(ability.can(Action::Read, Subject::User));
        assert!(ability.can_field(Action::Read, &user, "email"));
        assert!(!ability.can_field(Action::Read, &user, "last_login_at"));

        let mut body = json!({ "id": "u1", "email": "a@b.co", "last_login_at": null });
        ability.filter_fields(Action::Read, &user, &mut body);
        assert_eq!(body, json!({ "id": "u1", "email": "a@b.co" }));
    }

    #[test]
    fn no_rules_means_no_access() {
        let ability = Ability::default();
        assert!(!ability.can(Action::Read, Subject::User));
        let err = ability.ensure(Action::Read, Subject::User).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.message(), "You are not allowed to read User");
    }

    #[test]
    fn rules_serialize_compactly() {
        let mut b = AbilityBuilder::new();
        b.can(Action::Read, Subject::User).when(json!({ "id": "u1" }));
        b.cannot(Action::Read, Subject::SessionNote);
        let json = serde_json::to_value(b.build().rules()).unwrap();
        assert_eq!(json[0], json!({ "action": "read", "subject": "User", "conditions": { "id": "u1" } }));
        assert_eq!(json[1], json!({ "action": "read", "subject": "SessionNote", "inverted": true }));
    }
}
