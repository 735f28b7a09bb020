use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use taskwise::task::{TaskId, TaskStats, render};

use super::AppState;
use super::models::{
    ConfigResponse, CreateTaskRequest, ErrorResponse, FilterQuery, MigrationResponse,
    ReminderResponse, SessionResponse, SignInRequest, SignInResponse, TaskListResponse,
    UpdateTaskRequest, UpgradeResponse,
};

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConfigResponse::from(state.config.as_ref()))
}

pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.lock().await;
    Json(SessionResponse::from(&*session))
}

pub async fn continue_as_guest(State(state): State<AppState>) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    if let Err(e) = session.continue_as_guest().await {
        return ErrorResponse::respond(&e);
    }
    (StatusCode::CREATED, Json(SessionResponse::from(&*session))).into_response()
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.sign_in(&req.credential).await {
        Ok(outcome) => {
            let response = SignInResponse {
                session: SessionResponse::from(&*session),
                migration: MigrationResponse::from(outcome.migration),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn begin_upgrade(State(state): State<AppState>) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.begin_upgrade().await {
        Ok(pending_tasks) => (StatusCode::OK, Json(UpgradeResponse { pending_tasks })).into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn retry_migration(State(state): State<AppState>) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.retry_migration().await {
        Ok(copied) => {
            let response = MigrationResponse {
                status: "completed",
                copied,
                error: None,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn sign_out(State(state): State<AppState>) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.sign_out().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> impl IntoResponse {
    let filter = match query.parse() {
        Ok(filter) => filter,
        Err(e) => return ErrorResponse::respond(&e),
    };

    let session = state.session.lock().await;
    let store = session.store();
    if !store.is_bound() {
        return ErrorResponse::respond(&taskwise::Error::InvalidState(
            "sign in or continue as guest first".into(),
        ));
    }

    let tasks = store.tasks();
    let response = TaskListResponse {
        stats: TaskStats::of(&tasks),
        tasks: render(&tasks, filter),
    };
    (StatusCode::OK, Json(response)).into_response()
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> impl IntoResponse {
    let priority = match req.priority.unwrap_or_default().into_priority() {
        Ok(priority) => priority,
        Err(e) => return ErrorResponse::respond(&e),
    };

    let session = state.session.lock().await;
    match session.store().create(&req.text, priority).await {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> impl IntoResponse {
    let priority = match req.priority.map(|p| p.into_priority()).transpose() {
        Ok(priority) => priority,
        Err(e) => return ErrorResponse::respond(&e),
    };

    let session = state.session.lock().await;
    let id = TaskId::from(id);
    match session
        .store()
        .update(&id, req.text.as_deref(), priority)
        .await
    {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => ErrorResponse::not_found(format!("Task {id} not found")),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn toggle_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let session = state.session.lock().await;
    let id = TaskId::from(id);
    match session.store().toggle_completion(&id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => ErrorResponse::not_found(format!("Task {id} not found")),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let session = state.session.lock().await;
    match session.store().remove(&TaskId::from(id)).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn notification_status(State(state): State<AppState>) -> impl IntoResponse {
    let reminders = state.reminders.lock().await;
    Json(reminders.status())
}

pub async fn enable_notifications(State(state): State<AppState>) -> impl IntoResponse {
    let mut reminders = state.reminders.lock().await;
    match reminders.enable() {
        Ok(()) => (StatusCode::OK, Json(reminders.status())).into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn disable_notifications(State(state): State<AppState>) -> impl IntoResponse {
    let mut reminders = state.reminders.lock().await;
    match reminders.disable() {
        Ok(()) => (StatusCode::OK, Json(reminders.status())).into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}

pub async fn trigger_notification(State(state): State<AppState>) -> impl IntoResponse {
    let reminders = state.reminders.lock().await;
    match reminders.trigger_now() {
        Ok(reminder) => (StatusCode::OK, Json(ReminderResponse::from(reminder))).into_response(),
        Err(e) => ErrorResponse::respond(&e),
    }
}
