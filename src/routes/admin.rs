use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, Role};
use crate::errors::AppResult;
use crate::events::audit::{history, verify_chain, ChainReport};
use crate::identity;
use crate::jwt::AuthUser;
use crate::models::audit::AuditEntry;
use crate::models::org::{
    AssignmentRequest, CreateOrganizationRequest, Membership, MembershipRequest, ObjectAssignment, Organization,
};
use crate::models::user::{CreateUserRequest, User, UserFlagsUpdate};

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupRoleRequest {
    #[schema(example = "INSPECTOR")]
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionGrantRequest {
    #[schema(example = "change_remark")]
    pub codename: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrantResponse {
    /// `false` when the grant already existed.
    pub added: bool,
}

#[utoipa::path(
    post,
    path = "/admin/users",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username already taken")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    auth.require_staff()?;
    let user = identity::create_user(&state.pool, payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}/flags",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserFlagsUpdate,
    responses((status = 200, description = "Flags updated", body = User))
)]
pub async fn set_flags(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UserFlagsUpdate>,
) -> AppResult<Json<User>> {
    auth.require_staff()?;
    Ok(Json(identity::set_flags(&state.pool, id, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/groups",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = GroupRoleRequest,
    responses((status = 200, description = "Group role tag present", body = GrantResponse))
)]
pub async fn add_group_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<GroupRoleRequest>,
) -> AppResult<Json<GrantResponse>> {
    auth.require_staff()?;
    let added = identity::add_group_role(&state.pool, id, payload.role).await?;
    Ok(Json(GrantResponse { added }))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/permissions",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = PermissionGrantRequest,
    responses((status = 200, description = "Permission granted", body = GrantResponse))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PermissionGrantRequest>,
) -> AppResult<Json<GrantResponse>> {
    auth.require_staff()?;
    let added = identity::grant_permission(&state.pool, id, &payload.codename).await?;
    Ok(Json(GrantResponse { added }))
}

#[utoipa::path(
    get,
    path = "/admin/orgs",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Organizations visible to the caller", body = [Organization]))
)]
pub async fn list_orgs(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Organization>>> {
    let orgs = identity::list_orgs(&state.pool).await?;
    let system_roles = &state.workflow.config().system_wide_roles;
    Ok(Json(authz::scope(&auth.actor, orgs, system_roles)))
}

#[utoipa::path(
    post,
    path = "/admin/orgs",
    tag = "Admin",
    security(("bearerAuth" = [])),
    request_body = CreateOrganizationRequest,
    responses((status = 201, description = "Organization created", body = Organization))
)]
pub async fn create_org(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateOrganizationRequest>,
) -> AppResult<(StatusCode, Json<Organization>)> {
    auth.require_staff()?;
    let org = identity::create_org(&state.pool, payload).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

#[utoipa::path(
    post,
    path = "/admin/orgs/{id}/members",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = MembershipRequest,
    responses(
        (status = 201, description = "Membership added", body = Membership),
        (status = 422, description = "Role cannot be held through a membership")
    )
)]
pub async fn add_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<MembershipRequest>,
) -> AppResult<(StatusCode, Json<Membership>)> {
    auth.require_staff()?;
    let membership = identity::add_membership(&state.pool, org_id, payload).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

#[utoipa::path(
    delete,
    path = "/admin/orgs/{id}/members/{user_id}/{role}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "User id"),
        ("role" = String, Path, description = "Membership role")
    ),
    responses((status = 204, description = "Membership removed"))
)]
pub async fn remove_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((org_id, user_id, role)): Path<(Uuid, Uuid, String)>,
) -> AppResult<StatusCode> {
    auth.require_staff()?;
    identity::remove_membership(&state.pool, org_id, user_id, role.parse()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/admin/objects/{id}/assignments",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Construction object id")),
    request_body = AssignmentRequest,
    responses((status = 200, description = "Assignment active", body = ObjectAssignment))
)]
pub async fn assign_to_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(object_id): Path<Uuid>,
    Json(payload): Json<AssignmentRequest>,
) -> AppResult<Json<ObjectAssignment>> {
    auth.require_staff()?;
    let assignment = identity::assign_to_object(&state.pool, object_id, payload, auth.user_id).await?;
    Ok(Json(assignment))
}

#[utoipa::path(
    delete,
    path = "/admin/objects/{id}/assignments/{user_id}/{role}",
    tag = "Admin",
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Construction object id"),
        ("user_id" = Uuid, Path, description = "User id"),
        ("role" = String, Path, description = "Assignment role")
    ),
    responses((status = 204, description = "Assignment deactivated"))
)]
pub async fn deactivate_assignment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((object_id, user_id, role)): Path<(Uuid, Uuid, String)>,
) -> AppResult<StatusCode> {
    auth.require_staff()?;
    identity::deactivate_assignment(&state.pool, object_id, user_id, role.parse()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/admin/audit/verify",
    tag = "Admin",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Audit hash chain report", body = ChainReport))
)]
pub async fn verify_audit_chain(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<ChainReport>> {
    auth.require_staff()?;
    Ok(Json(verify_chain(&state.pool).await?))
}

#[utoipa::path(
    get,
    path = "/admin/audit/history/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Audited record id")),
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Audit rows for the record, oldest first", body = [AuditEntry]))
)]
pub async fn audit_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    auth.require_staff()?;
    Ok(Json(history(&state.pool, id).await?))
}
