use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde_json::Value;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::authz::{MatrixPolicyEvaluator, PermissionMatrix, ResourceType};
use crate::config::WorkflowConfig;
use crate::errors::AppError;
use crate::events::{init_event_bus, EventBus};
use crate::jwt::{AuthUser, JwtConfig};
use crate::lifecycle::Workflow;
use crate::routes::{admin, auth, checklists, health, issues, objects, transitions, visits};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub workflow: Workflow,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, matrix: PermissionMatrix, config: WorkflowConfig, bus: EventBus) -> Self {
        let evaluator = Arc::new(MatrixPolicyEvaluator::new(Arc::new(matrix)));
        let workflow = Workflow::new(pool.clone(), evaluator, Arc::new(config), bus);
        Self {
            pool,
            jwt: Arc::new(jwt),
            workflow,
        }
    }

    /// Reads every configuration struct from the environment.
    pub fn from_env(pool: SqlitePool) -> Result<Self, AppError> {
        let (bus, _) = init_event_bus();
        Ok(Self::new(
            pool,
            JwtConfig::from_env()?,
            PermissionMatrix::from_env()?,
            WorkflowConfig::from_env()?,
            bus,
        ))
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    Ok(router(AppState::from_env(pool)?))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let object_routes = Router::new()
        .route("/", get(objects::list_objects).post(objects::create_object))
        .route("/:id", get(objects::get_object));

    let opening_routes = Router::new()
        .route("/", get(checklists::list_opening_checklists))
        .route("/:id", get(checklists::get_opening_checklist).put(checklists::update_opening_checklist));

    let daily_routes = Router::new()
        .route("/", get(checklists::list_daily_checklists).post(checklists::create_daily_checklist))
        .route("/:id", patch(checklists::update_daily_checklist));

    let remark_routes = Router::new()
        .route("/", get(issues::list_remarks).post(issues::create_remark))
        .route("/:id", get(issues::get_remark));

    let violation_routes = Router::new()
        .route("/", get(issues::list_violations).post(issues::create_violation))
        .route("/:id", get(issues::get_violation));

    let visit_routes = Router::new().route("/", get(visits::list_visits).post(visits::start_visit));

    let admin_routes = Router::new()
        .route("/users", post(admin::create_user))
        .route("/users/:id/flags", patch(admin::set_flags))
        .route("/users/:id/groups", post(admin::add_group_role))
        .route("/users/:id/permissions", post(admin::grant_permission))
        .route("/orgs", get(admin::list_orgs).post(admin::create_org))
        .route("/orgs/:id/members", post(admin::add_membership))
        .route("/orgs/:id/members/:user_id/:role", delete(admin::remove_membership))
        .route("/objects/:id/assignments", put(admin::assign_to_object))
        .route("/objects/:id/assignments/:user_id/:role", delete(admin::deactivate_assignment))
        .route("/audit/verify", get(admin::verify_audit_chain))
        .route("/audit/history/:id", get(admin::audit_history));

    let mut router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/admin", admin_routes)
        .nest("/objects", object_routes)
        .nest("/opening-checklists", opening_routes)
        .nest("/daily-checklists", daily_routes)
        .nest("/remarks", remark_routes)
        .nest("/violations", violation_routes)
        .nest("/visits", visit_routes);

    // One action route per collection keeps static prefixes unambiguous.
    for resource in ResourceType::ALL {
        let path = format!("/{}/:id/actions/:event", resource.collection());
        router = router.route(
            &path,
            post(
                move |State(state): State<AppState>,
                      auth: AuthUser,
                      Path((id, event)): Path<(Uuid, String)>,
                      body: Option<Json<Value>>| async move {
                    transitions::run_transition(state, auth, resource, id, event, body.map(|Json(v)| v)).await
                },
            ),
        );
    }

    router
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
