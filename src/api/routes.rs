use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, patch, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{AppState, handlers};

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin.trim()) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!("Invalid CORS origin {:?}, allowing any origin", origin);
                AllowOrigin::any()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/config", get(handlers::get_config))
        .route("/api/session", get(handlers::get_session))
        .route("/api/session", delete(handlers::sign_out))
        .route("/api/session/guest", post(handlers::continue_as_guest))
        .route("/api/session/signin", post(handlers::sign_in))
        .route("/api/session/upgrade", post(handlers::begin_upgrade))
        .route("/api/session/migration/retry", post(handlers::retry_migration))
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks", post(handlers::create_task))
        .route("/api/tasks/{id}", patch(handlers::update_task))
        .route("/api/tasks/{id}", delete(handlers::delete_task))
        .route("/api/tasks/{id}/toggle", post(handlers::toggle_task))
        .route("/api/notifications", get(handlers::notification_status))
        .route("/api/notifications/enable", post(handlers::enable_notifications))
        .route("/api/notifications/disable", post(handlers::disable_notifications))
        .route("/api/notifications/trigger", post(handlers::trigger_notification))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
