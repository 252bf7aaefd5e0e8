use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::checklist::{CreateDailyChecklistRequest, DailyChecklistUpdate, OpeningChecklistUpdate};
use crate::models::{DailyChecklist, OpeningChecklist};

#[utoipa::path(
    get,
    path = "/opening-checklists",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Opening checklists visible to the caller", body = [OpeningChecklist]))
)]
pub async fn list_opening_checklists(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<OpeningChecklist>>> {
    Ok(Json(state.workflow.list_opening_checklists(&auth.actor).await?))
}

#[utoipa::path(
    get,
    path = "/opening-checklists/{id}",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Checklist id")),
    responses((status = 200, description = "Opening checklist", body = OpeningChecklist))
)]
pub async fn get_opening_checklist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OpeningChecklist>> {
    Ok(Json(state.workflow.get_opening_checklist(&auth.actor, id).await?))
}

#[utoipa::path(
    put,
    path = "/opening-checklists/{id}",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Checklist id")),
    request_body = OpeningChecklistUpdate,
    responses(
        (status = 200, description = "Checklist data replaced", body = OpeningChecklist),
        (status = 409, description = "Checklist is not editable in its current state")
    )
)]
pub async fn update_opening_checklist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<OpeningChecklistUpdate>,
) -> AppResult<Json<OpeningChecklist>> {
    state
        .workflow
        .update_opening_checklist(&auth.actor, id, payload.data)
        .await?;
    Ok(Json(state.workflow.get_opening_checklist(&auth.actor, id).await?))
}

#[utoipa::path(
    get,
    path = "/daily-checklists",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Daily checklists visible to the caller", body = [DailyChecklist]))
)]
pub async fn list_daily_checklists(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<DailyChecklist>>> {
    Ok(Json(state.workflow.list_daily_checklists(&auth.actor).await?))
}

#[utoipa::path(
    post,
    path = "/daily-checklists",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    request_body = CreateDailyChecklistRequest,
    responses((status = 201, description = "Daily checklist created with every item unset", body = DailyChecklist))
)]
pub async fn create_daily_checklist(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateDailyChecklistRequest>,
) -> AppResult<(StatusCode, Json<DailyChecklist>)> {
    let checklist = state.workflow.create_daily_checklist(&auth.actor, payload).await?;
    Ok((StatusCode::CREATED, Json(checklist)))
}

#[utoipa::path(
    patch,
    path = "/daily-checklists/{id}",
    tag = "Checklists",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Checklist id")),
    request_body = DailyChecklistUpdate,
    responses(
        (status = 200, description = "Item statuses updated", body = DailyChecklist),
        (status = 422, description = "Unknown item key")
    )
)]
pub async fn update_daily_checklist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DailyChecklistUpdate>,
) -> AppResult<Json<DailyChecklist>> {
    state
        .workflow
        .update_daily_checklist(&auth.actor, id, payload.items)
        .await?;
    let checklist = crate::lifecycle::daily::fetch_daily(&state.pool, id).await?;
    Ok(Json(checklist))
}
