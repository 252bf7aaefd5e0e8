use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::inspection::NewVisit;
use crate::models::InspectionVisit;

#[utoipa::path(
    get,
    path = "/visits",
    tag = "Visits",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Inspection visits visible to the caller", body = [InspectionVisit]))
)]
pub async fn list_visits(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<InspectionVisit>>> {
    Ok(Json(state.workflow.list_visits(&auth.actor).await?))
}

#[utoipa::path(
    post,
    path = "/visits",
    tag = "Visits",
    security(("bearerAuth" = [])),
    request_body = NewVisit,
    responses(
        (status = 201, description = "Visit opened", body = InspectionVisit),
        (status = 200, description = "Offline batch already recorded; stored visit returned", body = InspectionVisit)
    )
)]
pub async fn start_visit(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NewVisit>,
) -> AppResult<(StatusCode, Json<InspectionVisit>)> {
    let (visit, created) = state.workflow.start_visit(&auth.actor, payload).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(visit)))
}
