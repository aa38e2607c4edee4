use serde_json::json;
use uuid::Uuid;

use super::{Ability, AbilityBuilder, Action, Subject};
use crate::middleware::auth::AuthUser;
use crate::types::Role;

/// Fields support staff may see on a user.
pub const SUPPORT_USER_FIELDS: &[&str] = &["id", "tenant_id", "email", "first_name", "last_name", "role", "is_active"];

const CLINICAL_ONLY: &str = "Session notes are only available to the treating therapist";

impl Ability {
    pub fn for_user(user: &AuthUser) -> Self {
        Self::for_identity(user.id, user.tenant_id, user.role)
    }

    pub fn for_identity(user_id: Uuid, tenant_id: Option<Uuid>, role: Role) -> Self {
        let mut b = AbilityBuilder::new();
        let own_tenant = json!({ "tenant_id": tenant_id });

        match role {
            Role::PlatformAdmin => {
                b.can(Action::Manage, Subject::All);
                for action in [Action::Create, Action::Read, Action::Update] {
                    b.cannot(action, Subject::SessionNote).because(CLINICAL_ONLY);
                }
                b.cannot(Action::Update, Subject::AuditLog).because("Audit logs are immutable");
                b.cannot(Action::Delete, Subject::AuditLog).because("Audit logs are immutable");
            }
            Role::Admin => {
                for subject in [
                    Subject::User,
                    Subject::Client,
                    Subject::Therapist,
                    Subject::Appointment,
                    Subject::Invoice,
                    Subject::SupportTicket,
                ] {
                    b.can(Action::Manage, subject).when(own_tenant.clone());
                }
                b.can(Action::Read, Subject::AuditLog).when(own_tenant.clone());
                b.can(Action::Manage, Subject::SecuritySettings);
                b.cannot(Action::Update, Subject::AuditLog).because("Audit logs are immutable");
                b.cannot(Action::Delete, Subject::AuditLog).because("Audit logs are immutable");
                b.cannot(Action::Read, Subject::SessionNote).because(CLINICAL_ONLY);
                b.cannot(Action::Read, Subject::TreatmentPlan).because(CLINICAL_ONLY);
            }
            Role::Therapist => {
                let own_caseload = json!({ "therapist_id": user_id, "tenant_id": tenant_id });
                b.can(Action::Create, Subject::SessionNote);
                b.can(Action::Read, Subject::SessionNote).when(own_caseload.clone());
                b.can(Action::Update, Subject::SessionNote).when(own_caseload.clone());
                b.can(Action::Delete, Subject::SessionNote).when(own_caseload.clone());
                b.can(Action::Manage, Subject::TreatmentPlan).when(own_caseload.clone());
                b.can(Action::Manage, Subject::Appointment).when(own_caseload.clone());
                b.can(Action::Read, Subject::Client).when(own_caseload);
                b.can(Action::Read, Subject::User).when(json!({ "id": user_id }));
                b.can(Action::Update, Subject::User).when(json!({ "id": user_id }));
                b.can(Action::Create, Subject::Message);
                b.can(Action::Read, Subject::Message).when(json!({ "sender_id": user_id }));
                b.can(Action::Read, Subject::Message).when(json!({ "recipient_id": user_id }));
            }
            Role::Client => {
                b.can(Action::Read, Subject::User).when(json!({ "id": user_id }));
                b.can(Action::Update, Subject::User).when(json!({ "id": user_id }));
                b.can(Action::Create, Subject::Appointment);
                b.can(Action::Read, Subject::Appointment).when(json!({ "client_id": user_id }));
                b.can(Action::Read, Subject::Invoice).when(json!({ "client_id": user_id }));
                b.can(Action::Read, Subject::TreatmentPlan).when(json!({ "client_id": user_id }));
                b.can(Action::Create, Subject::Message);
                b.can(Action::Read, Subject::Message).when(json!({ "sender_id": user_id }));
                b.can(Action::Read, Subject::Message).when(json!({ "recipient_id": user_id }));
                b.cannot(Action::Read, Subject::SessionNote).because(CLINICAL_ONLY);
            }
            Role::Support => {
                b.can(Action::Read, Subject::User).fields(SUPPORT_USER_FIELDS);
                b.can(Action::Manage, Subject::SupportTicket);
                b.cannot(Action::Read, Subject::SessionNote).because("Support staff cannot access clinical records");
                b.cannot(Action::Read, Subject::TreatmentPlan).because("Support staff cannot access clinical records");
            }
        }

        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Resource;

    fn note_of(therapist: Uuid, tenant: Uuid) -> Resource {
        Resource::new(
            Subject::SessionNote,
            json!({ "therapist_id": therapist, "tenant_id": tenant, "client_id": Uuid::new_v4() }),
        )
    }

    #[test]
    fn therapists_only_reach_their_own_notes() {
        let me = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let ability = Ability::for_identity(me, Some(tenant), Role::Therapist);

        assert!(ability.can(Action::Create, Subject::SessionNote));
        assert!(ability.can_on(Action::Read, &note_of(me, tenant)));
        assert!(ability.can_on(Action::Delete, &note_of(me, tenant)));
        assert!(!ability.can_on(Action::Read, &note_of(Uuid::new_v4(), tenant)));
        // Same therapist id under another practice does not match
        assert!(!ability.can_on(Action::Read, &note_of(me, Uuid::new_v4())));
        assert!(!ability.can(Action::Read, Subject::AuditLog));
    }

    #[test]
    fn nobody_else_reads_clinical_notes() {
        let tenant = Uuid::new_v4();
        let note = note_of(Uuid::new_v4(), tenant);
        for role in [Role::Client, Role::Admin, Role::Support, Role::PlatformAdmin] {
            let ability = Ability::for_identity(Uuid::new_v4(), Some(tenant), role);
            assert!(!ability.can_on(Action::Read, &note), "{} read a note", role);
            let err = ability.ensure_on(Action::Read, &note).unwrap_err();
            assert_eq!(err.status_code(), 403);
        }
    }

    #[test]
    fn admins_are_scoped_to_their_tenant() {
        let tenant = Uuid::new_v4();
        let ability = Ability::for_identity(Uuid::new_v4(), Some(tenant), Role::Admin);
        let ours = Resource::new(Subject::User, json!({ "id": Uuid::new_v4(), "tenant_id": tenant }));
        let theirs = Resource::new(Subject::User, json!({ "id": Uuid::new_v4(), "tenant_id": Uuid::new_v4() }));

        assert!(ability.can_on(Action::Update, &ours));
        assert!(!ability.can_on(Action::Update, &theirs));
        assert!(ability.can(Action::Read, Subject::AuditLog));
        assert!(ability.cannot(Action::Delete, Subject::AuditLog));
        assert!(ability.can(Action::Manage, Subject::SecuritySettings));
    }

    #[test]
    fn support_sees_a_subset_of_user_fields() {
        let ability = Ability::for_identity(Uuid::new_v4(), None, Role::Support);
        let user = Resource::new(Subject::User, json!({ "id": Uuid::new_v4() }));
        assert!(ability.can_on(Action::Read, &user));
        assert!(ability.can_field(Action::Read, &user, "email"));
        assert!(!ability.can_field(Action::Read, &user, "last_login_at"));
        assert!(!ability.can(Action::Update, Subject::User));
    }

    #[test]
    fn platform_admin_manages_everything_but_clinical_content() {
        let ability = Ability::for_identity(Uuid::new_v4(), None, Role::PlatformAdmin);
        assert!(ability.can(Action::Delete, Subject::User));
        assert!(ability.can(Action::Manage, Subject::SecuritySettings));
        assert!(ability.can(Action::Delete, Subject::SessionNote));
        assert!(ability.cannot(Action::Read, Subject::SessionNote));
        assert!(ability.cannot(Action::Create, Subject::SessionNote));
    }

    #[test]
    fn clients_read_only_their_own_records() {
        let me = Uuid::new_v4();
        let ability = Ability::for_identity(me, Some(Uuid::new_v4()), Role::Client);
        let mine = Resource::new(Subject::Invoice, json!({ "client_id": me }));
        let other = Resource::new(Subject::Invoice, json!({ "client_id": Uuid::new_v4() }));
        assert!(ability.can_on(Action::Read, &mine));
        assert!(!ability.can_on(Action::Read, &other));
        assert!(!ability.can(Action::Update, Subject::Invoice));
    }
}
