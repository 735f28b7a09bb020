use axum::{
    Json,
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use taskwise::Error;
use taskwise::config::Config;
use taskwise::notify::Reminder;
use taskwise::session::{Identity, MigrationOutcome, SessionManager, SessionStatus};
use taskwise::task::{Filter, Level, Priority, Task, TaskStats};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub google_client_id: String,
    pub app_name: String,
    pub app_version: String,
}

impl From<&Config> for ConfigResponse {
    fn from(config: &Config) -> Self {
        Self {
            google_client_id: config.identity.google_client_id.clone(),
            app_name: config.app.name.clone(),
            app_version: config.app.version.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub stats: TaskStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    pub filter: Option<String>,
}

impl FilterQuery {
    pub fn parse(&self) -> Result<Filter, Error> {
        self.filter.as_deref().unwrap_or_default().parse()
    }
}

/// Raw factor values as sent by the form. Missing factors are LOW.
#[derive(Debug, Default, Deserialize)]
pub struct PriorityInput {
    pub importance: Option<u8>,
    pub urgency: Option<u8>,
    pub easiness: Option<u8>,
    pub interest: Option<u8>,
    pub dependency: Option<u8>,
}

impl PriorityInput {
    pub fn into_priority(self) -> Result<Priority, Error> {
        let level = |value: Option<u8>| value.map_or(Ok(Level::Low), Level::try_from);
        Ok(Priority::new(
            level(self.importance)?,
            level(self.urgency)?,
            level(self.easiness)?,
            level(self.interest)?,
            level(self.dependency)?,
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub text: String,
    #[serde(default)]
    pub priority: Option<PriorityInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub text: Option<String>,
    pub priority: Option<PriorityInput>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub credential: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub status: SessionStatus,
    pub identity: Identity,
    pub pending_migration: Option<usize>,
}

impl From<&SessionManager> for SessionResponse {
    fn from(session: &SessionManager) -> Self {
        Self {
            status: session.status(),
            identity: session.identity().clone(),
            pending_migration: session.pending_migration().map(|p| p.tasks.len()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResponse {
    pub status: &'static str,
    pub copied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl From<MigrationOutcome> for MigrationResponse {
    fn from(outcome: MigrationOutcome) -> Self {
        match outcome {
            MigrationOutcome::NotNeeded => Self {
                status: "notNeeded",
                copied: 0,
                error: None,
            },
            MigrationOutcome::Completed { copied } => Self {
                status: "completed",
                copied,
                error: None,
            },
            MigrationOutcome::Failed(e) => Self {
                status: "failed",
                copied: match &e {
                    Error::Migration { copied, .. } => *copied,
                    _ => 0,
                },
                error: Some(ErrorResponse::from(&e)),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub session: SessionResponse,
    pub migration: MigrationResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResponse {
    pub pending_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    #[serde(flatten)]
    pub reminder: Reminder,
    pub title: String,
    pub body: String,
}

impl From<Reminder> for ReminderResponse {
    fn from(reminder: Reminder) -> Self {
        Self {
            title: reminder.title(),
            body: reminder.body(),
            reminder,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
}

impl From<&Error> for ErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            error: e.to_string(),
            code: e.code(),
            retryable: e.retryable(),
        }
    }
}

impl ErrorResponse {
    pub fn status_for(e: &Error) -> StatusCode {
        match e {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Permission(_) => StatusCode::FORBIDDEN,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::Sync {
                retriable: true, ..
            } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Sync { .. } | Error::Migration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn respond(e: &Error) -> Response<Body> {
        (Self::status_for(e), Json(Self::from(e))).into_response()
    }

    pub fn not_found(message: impl Into<String>) -> Response<Body> {
        (
            StatusCode::NOT_FOUND,
            Json(Self {
                error: message.into(),
                code: "NOT_FOUND",
                retryable: false,
            }),
        )
            .into_response()
    }
}
