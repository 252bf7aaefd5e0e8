use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::issue::NewIssue;
use crate::models::{Issue, IssueKind};

/// 201 for a new record, 200 when an offline batch was replayed.
fn created_status(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

async fn create(state: AppState, auth: AuthUser, kind: IssueKind, payload: NewIssue) -> AppResult<(StatusCode, Json<Issue>)> {
    let (issue, created) = state.workflow.create_issue(&auth.actor, kind, payload).await?;
    Ok((created_status(created), Json(issue)))
}

#[utoipa::path(
    get,
    path = "/remarks",
    tag = "Issues",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Remarks visible to the caller", body = [Issue]))
)]
pub async fn list_remarks(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Issue>>> {
    Ok(Json(state.workflow.list_issues(&auth.actor, IssueKind::Remark).await?))
}

#[utoipa::path(
    post,
    path = "/remarks",
    tag = "Issues",
    security(("bearerAuth" = [])),
    request_body = NewIssue,
    responses(
        (status = 201, description = "Remark recorded", body = Issue),
        (status = 200, description = "Offline batch already recorded; stored remark returned", body = Issue)
    )
)]
pub async fn create_remark(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NewIssue>,
) -> AppResult<(StatusCode, Json<Issue>)> {
    create(state, auth, IssueKind::Remark, payload).await
}

#[utoipa::path(
    get,
    path = "/remarks/{id}",
    tag = "Issues",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Remark id")),
    responses((status = 200, description = "Remark", body = Issue))
)]
pub async fn get_remark(State(state): State<AppState>, auth: AuthUser, Path(id): Path<Uuid>) -> AppResult<Json<Issue>> {
    Ok(Json(state.workflow.get_issue(&auth.actor, IssueKind::Remark, id).await?))
}

#[utoipa::path(
    get,
    path = "/violations",
    tag = "Issues",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Violations visible to the caller", body = [Issue]))
)]
pub async fn list_violations(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Issue>>> {
    Ok(Json(state.workflow.list_issues(&auth.actor, IssueKind::Violation).await?))
}

#[utoipa::path(
    post,
    path = "/violations",
    tag = "Issues",
    security(("bearerAuth" = [])),
    request_body = NewIssue,
    responses(
        (status = 201, description = "Violation recorded", body = Issue),
        (status = 200, description = "Offline batch already recorded; stored violation returned", body = Issue),
        (status = 403, description = "Caller is not confirmed on site")
    )
)]
pub async fn create_violation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NewIssue>,
) -> AppResult<(StatusCode, Json<Issue>)> {
    create(state, auth, IssueKind::Violation, payload).await
}

#[utoipa::path(
    get,
    path = "/violations/{id}",
    tag = "Issues",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Violation id")),
    responses((status = 200, description = "Violation", body = Issue))
)]
pub async fn get_violation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Issue>> {
    Ok(Json(state.workflow.get_issue(&auth.actor, IssueKind::Violation, id).await?))
}
