mod handlers;
mod models;
mod routes;

use std::sync::Arc;
use tokio::sync::Mutex;

use taskwise::config::Config;
use taskwise::notify::NotificationScheduler;
use taskwise::session::SessionManager;

pub use routes::create_router;

/// Shared by every handler. Each service is owned by one request at a time.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<SessionManager>>,
    pub reminders: Arc<Mutex<NotificationScheduler>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(session: SessionManager, reminders: NotificationScheduler, config: Config) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            reminders: Arc::new(Mutex::new(reminders)),
            config: Arc::new(config),
        }
    }
}
