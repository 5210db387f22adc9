use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, error};

use crate::ops::policy::{is_allowed, Action, Resource};
use crate::ops::{
    Dashboard, EquipmentUpdate, JobFilter, JobUpdate, NewEquipment, NewJob, NewTask, TaskStatus,
    WorkflowEngine, WorkflowError,
};
use crate::user::auth::{AuthToken, AuthTokenValue, UsernamePasswordCredentials};
use crate::user::{UserRole, UserStore};
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, response, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::session::Session;
use super::{log_requests, state::*, ServerConfig};

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Permission(_) => StatusCode::FORBIDDEN,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::Precondition(_) | WorkflowError::Conflict(_) => StatusCode::CONFLICT,
            WorkflowError::Internal(err) => {
                error!("Internal error: {:#}", err);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub username: Option<String>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginSuccessResponse {
    token: String,
}

#[derive(Deserialize, Debug)]
struct CreateUserBody {
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Deserialize, Debug)]
struct SetRoleBody {
    pub role: UserRole,
}

#[derive(Deserialize, Debug)]
struct SetTaskStatusBody {
    pub status: TaskStatus,
}

#[derive(Deserialize, Debug)]
struct DashboardQuery {
    pub days: Option<i64>,
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        username: session.map(|s| s.user.username),
    };
    Json(stats)
}

async fn login(State(state): State<ServerState>, Json(body): Json<LoginBody>) -> Response {
    debug!("login() called for {}", body.username);
    let user = match state.user_store.get_user_by_username(&body.username) {
        Ok(Some(user)) if user.is_active => user,
        _ => return StatusCode::FORBIDDEN.into_response(),
    };
    let credentials = match state.user_store.get_password_credentials(&body.username) {
        Ok(Some(credentials)) => credentials,
        _ => return StatusCode::FORBIDDEN.into_response(),
    };
    match credentials
        .hasher
        .verify(body.password.as_str(), credentials.hash.as_str())
    {
        Ok(true) => {}
        _ => return StatusCode::FORBIDDEN.into_response(),
    }

    let auth_token = AuthToken {
        user_id: user.id,
        created: Utc::now(),
        last_used: None,
        value: AuthTokenValue::generate(),
    };
    if let Err(err) = state.user_store.add_auth_token(&auth_token) {
        error!("Error with auth token generation: {}", err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let response_body = LoginSuccessResponse {
        token: auth_token.value.0.clone(),
    };
    let response_body = serde_json::to_string(&response_body).unwrap();

    let cookie_value = HeaderValue::from_str(&format!(
        "session_token={}; Path=/; HttpOnly",
        auth_token.value.0
    ))
    .unwrap();
    response::Builder::new()
        .status(StatusCode::CREATED)
        .header(header::SET_COOKIE, cookie_value)
        .body(Body::from(response_body))
        .unwrap()
}

async fn logout(State(state): State<ServerState>, session: Session) -> Response {
    match state
        .user_store
        .delete_auth_token(&AuthTokenValue(session.token))
    {
        Ok(Some(_)) => {
            let cookie_value = Cookie::build(Cookie::new("session_token", ""))
                .path("/")
                .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
                .same_site(SameSite::Lax)
                .build();

            response::Builder::new()
                .status(StatusCode::OK)
                .header(header::SET_COOKIE, cookie_value.to_string())
                .body(Body::empty())
                .unwrap()
        }
        Ok(None) => StatusCode::BAD_REQUEST.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn list_users(_session: Session, State(user_store): State<GuardedUserStore>) -> Response {
    match user_store.get_all_users() {
        Ok(users) => Json(users).into_response(),
        Err(err) => {
            error!("Failed to list users: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn me(session: Session) -> Response {
    Json(session.user).into_response()
}

async fn create_user(
    session: Session,
    State(user_store): State<GuardedUserStore>,
    Json(body): Json<CreateUserBody>,
) -> Response {
    if !is_allowed(&session.user, Action::ManageUsers, Resource::None) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if body.username.trim().is_empty() || body.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Username and password must not be empty" })),
        )
            .into_response();
    }

    let user_id = match user_store.create_user(body.username.trim(), body.role) {
        Ok(id) => id,
        Err(err) => {
            debug!("Failed to create user {}: {}", body.username, err);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let credentials = match UsernamePasswordCredentials::from_plain_password(user_id, &body.password)
    {
        Ok(credentials) => credentials,
        Err(err) => {
            error!("Failed to hash password for new user: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(err) = user_store.set_password_credentials(&credentials) {
        error!("Failed to store credentials for new user: {}", err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match user_store.get_user(user_id) {
        Ok(Some(user)) => (StatusCode::CREATED, Json(user)).into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn set_user_role(
    session: Session,
    State(user_store): State<GuardedUserStore>,
    Path(user_id): Path<i64>,
    Json(body): Json<SetRoleBody>,
) -> Response {
    if !is_allowed(&session.user, Action::ManageUsers, Resource::None) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match user_store.get_user(user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
    match user_store.set_user_role(user_id, body.role) {
        Ok(()) => match user_store.get_user(user_id) {
            Ok(Some(user)) => Json(user).into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(err) => {
            error!("Failed to set role for user {}: {}", user_id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn deactivate_user(
    session: Session,
    State(user_store): State<GuardedUserStore>,
    Path(user_id): Path<i64>,
) -> Response {
    if !is_allowed(&session.user, Action::ManageUsers, Resource::None) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match user_store.get_user(user_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
    match user_store.deactivate_user(user_id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!("Failed to deactivate user {}: {}", user_id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_equipment(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
) -> Result<Response, WorkflowError> {
    let equipment = workflow.get_all_equipment(&session.user)?;
    Ok(Json(equipment).into_response())
}

async fn post_equipment(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Json(body): Json<NewEquipment>,
) -> Result<Response, WorkflowError> {
    let equipment = workflow.create_equipment(&session.user, body)?;
    Ok((StatusCode::CREATED, Json(equipment)).into_response())
}

async fn get_equipment(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let equipment = workflow.get_equipment(&session.user, id)?;
    Ok(Json(equipment).into_response())
}

async fn get_equipment_usage(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let usage = workflow.get_equipment_usage(&session.user, id)?;
    Ok(Json(usage).into_response())
}

async fn put_equipment(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
    Json(body): Json<EquipmentUpdate>,
) -> Result<Response, WorkflowError> {
    let equipment = workflow.update_equipment(&session.user, id, body)?;
    Ok(Json(equipment).into_response())
}

async fn delete_equipment(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    workflow.delete_equipment(&session.user, id)?;
    Ok(StatusCode::OK.into_response())
}

async fn list_jobs(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Query(filter): Query<JobFilter>,
) -> Result<Response, WorkflowError> {
    let jobs = workflow.get_jobs(&session.user, &filter)?;
    Ok(Json(jobs).into_response())
}

async fn post_job(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Json(body): Json<NewJob>,
) -> Result<Response, WorkflowError> {
    let job = workflow.create_job(&session.user, body)?;
    Ok((StatusCode::CREATED, Json(job)).into_response())
}

async fn get_job(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let job = workflow.get_job(&session.user, id)?;
    Ok(Json(job).into_response())
}

async fn put_job(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
    Json(body): Json<JobUpdate>,
) -> Result<Response, WorkflowError> {
    let job = workflow.update_job(&session.user, id, body)?;
    Ok(Json(job).into_response())
}

async fn complete_job(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let job = workflow.complete_job(&session.user, id)?;
    Ok(Json(job).into_response())
}

async fn cancel_job(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let job = workflow.cancel_job(&session.user, id)?;
    Ok(Json(job).into_response())
}

async fn get_job_change_logs(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let logs = workflow.get_change_logs(&session.user, id)?;
    Ok(Json(logs).into_response())
}

async fn get_job_tasks(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
) -> Result<Response, WorkflowError> {
    let tasks = workflow.get_tasks(&session.user, id)?;
    Ok(Json(tasks).into_response())
}

async fn post_job_task(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
    Json(body): Json<NewTask>,
) -> Result<Response, WorkflowError> {
    let task = workflow.add_task(&session.user, id, body)?;
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

async fn put_task_status(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Path(id): Path<i64>,
    Json(body): Json<SetTaskStatusBody>,
) -> Result<Response, WorkflowError> {
    let task = workflow.update_task_status(&session.user, id, body.status)?;
    Ok(Json(task).into_response())
}

async fn get_dashboard(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, WorkflowError> {
    let dashboard: Dashboard = workflow.get_dashboard(&session.user, query.days.unwrap_or(7))?;
    Ok(Json(dashboard).into_response())
}

async fn get_analytics(
    session: Session,
    State(workflow): State<GuardedWorkflow>,
) -> Result<Response, WorkflowError> {
    let analytics = workflow.get_analytics(&session.user)?;
    Ok(Json(analytics).into_response())
}

pub fn make_app(
    config: ServerConfig,
    workflow: Arc<WorkflowEngine>,
    user_store: Arc<dyn UserStore>,
) -> Router {
    let state = ServerState {
        config,
        start_time: Instant::now(),
        workflow,
        user_store,
        hash: env!("GIT_HASH").to_owned(),
    };

    let auth_routes: Router = Router::new()
        .route("/login", post(login))
        .route("/logout", get(logout))
        .with_state(state.clone());

    let users_routes: Router = Router::new()
        .route("/", get(list_users))
        .route("/", post(create_user))
        .route("/me", get(me))
        .route("/{id}/role", put(set_user_role))
        .route("/{id}", delete(deactivate_user))
        .with_state(state.clone());

    let equipment_routes: Router = Router::new()
        .route("/", get(list_equipment))
        .route("/", post(post_equipment))
        .route("/{id}", get(get_equipment))
        .route("/{id}/usage", get(get_equipment_usage))
        .route("/{id}", put(put_equipment))
        .route("/{id}", delete(delete_equipment))
        .with_state(state.clone());

    let job_routes: Router = Router::new()
        .route("/", get(list_jobs))
        .route("/", post(post_job))
        .route("/{id}", get(get_job))
        .route("/{id}", put(put_job))
        .route("/{id}/complete", post(complete_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/change-logs", get(get_job_change_logs))
        .route("/{id}/tasks", get(get_job_tasks))
        .route("/{id}/tasks", post(post_job_task))
        .with_state(state.clone());

    let task_routes: Router = Router::new()
        .route("/{id}/status", put(put_task_status))
        .with_state(state.clone());

    let reporting_routes: Router = Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/analytics", get(get_analytics))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/auth", auth_routes)
        .nest("/v1/users", users_routes)
        .nest("/v1/equipment", equipment_routes)
        .nest("/v1/jobs", job_routes)
        .nest("/v1/tasks", task_routes)
        .nest("/v1", reporting_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

pub async fn run_server(
    config: ServerConfig,
    workflow: Arc<WorkflowEngine>,
    user_store: Arc<dyn UserStore>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let app = make_app(config, workflow, user_store);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    Ok(axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::LogNotifier;
    use crate::ops::{OpsStore, SqliteOpsStore};
    use crate::user::SqliteUserStore;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt; // for `oneshot`

    fn make_test_app() -> (Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ops_store = Arc::new(SqliteOpsStore::new(temp_dir.path().join("ops.db")).unwrap());
        let user_store = Arc::new(SqliteUserStore::new(temp_dir.path().join("user.db")).unwrap());
        let workflow = Arc::new(WorkflowEngine::new(
            ops_store as Arc<dyn OpsStore>,
            user_store.clone() as Arc<dyn UserStore>,
            Arc::new(LogNotifier),
        ));
        let app = make_app(ServerConfig::default(), workflow, user_store);
        (app, temp_dir)
    }

    #[tokio::test]
    async fn responds_forbidden_on_protected_routes() {
        let (app, _tmp) = make_test_app();

        let protected_routes = vec![
            "/v1/users/",
            "/v1/users/me",
            "/v1/equipment/",
            "/v1/jobs/",
            "/v1/jobs/1",
            "/v1/jobs/1/tasks",
            "/v1/jobs/1/change-logs",
            "/v1/dashboard",
            "/v1/analytics",
            "/v1/auth/logout",
        ];

        for route in protected_routes.into_iter() {
            println!("Trying route {}", route);
            let request = Request::builder().uri(route).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn home_is_public() {
        let (app, _tmp) = make_test_app();

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_with_unknown_user_is_forbidden() {
        let (app, _tmp) = make_test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/auth/login")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"username":"nobody","password":"whatever"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
