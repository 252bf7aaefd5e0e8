use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::login,
        routes::auth::me,
        routes::objects::list_objects,
        routes::objects::create_object,
        routes::objects::get_object,
        routes::checklists::list_opening_checklists,
        routes::checklists::get_opening_checklist,
        routes::checklists::update_opening_checklist,
        routes::checklists::list_daily_checklists,
        routes::checklists::create_daily_checklist,
        routes::checklists::update_daily_checklist,
        routes::issues::list_remarks,
        routes::issues::create_remark,
        routes::issues::get_remark,
        routes::issues::list_violations,
        routes::issues::create_violation,
        routes::issues::get_violation,
        routes::visits::list_visits,
        routes::visits::start_visit,
        routes::transitions::run_transition,
        routes::admin::create_user,
        routes::admin::set_flags,
        routes::admin::add_group_role,
        routes::admin::grant_permission,
        routes::admin::list_orgs,
        routes::admin::create_org,
        routes::admin::add_membership,
        routes::admin::remove_membership,
        routes::admin::assign_to_object,
        routes::admin::deactivate_assignment,
        routes::admin::verify_audit_chain,
        routes::admin::audit_history,
    ),
    components(
        schemas(
            crate::authz::Role,
            crate::authz::ResourceType,
            crate::authz::Action,
            crate::lifecycle::TransitionOutcome,
            crate::lifecycle::IdempotentOutcome,
            crate::events::audit::ChainReport,
            models::audit::AuditEntry,
            routes::health::HealthResponse,
            routes::admin::GroupRoleRequest,
            routes::admin::PermissionGrantRequest,
            routes::admin::GrantResponse,
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::UserProfile,
            models::user::CreateUserRequest,
            models::user::UserFlagsUpdate,
            models::org::Organization,
            models::org::Membership,
            models::org::ObjectAssignment,
            models::org::CreateOrganizationRequest,
            models::org::MembershipRequest,
            models::org::AssignmentRequest,
            models::ObjectStatus,
            models::ConstructionObject,
            models::object::CreateObjectRequest,
            models::ChecklistStatus,
            models::DailyStatus,
            models::ItemStatus,
            models::OpeningChecklist,
            models::DailyChecklist,
            models::checklist::OpeningChecklistUpdate,
            models::checklist::CreateDailyChecklistRequest,
            models::checklist::DailyChecklistUpdate,
            models::IssueKind,
            models::IssueStatus,
            models::issue::Severity,
            models::issue::Fixability,
            models::Issue,
            models::issue::NewIssue,
            models::InspectionVisit,
            models::inspection::NewVisit,
            models::OfflineMeta,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Objects", description = "Construction objects"),
        (name = "Checklists", description = "Opening and daily checklists"),
        (name = "Issues", description = "Remarks and violations"),
        (name = "Visits", description = "Inspection visits"),
        (name = "Transitions", description = "Lifecycle events"),
        (name = "Admin", description = "Identity administration")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Swagger UI at `/docs`, backed by `/api-docs/openapi.json`.
pub fn swagger_routes() -> Router {
    Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_transition_route_and_bearer_scheme() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert!(doc["paths"].get("/{resource}/{id}/actions/{event}").is_some());
        assert!(doc["paths"].get("/auth/login").is_some());
        assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
    }
}
