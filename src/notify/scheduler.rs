//! Reminder cycle: one timer, one firing every [`REMINDER_INTERVAL`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::reminder::{Notifier, Permission, Reminder};
use super::settings::NotificationSettings;
use crate::error::{Error, Result};
use crate::task::Task;

pub const REMINDER_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Time until the next reminder. Never negative: an overdue reminder fires
/// right away.
pub fn next_delay(
    last_fired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Duration {
    let Some(last_fired) = last_fired else {
        return interval;
    };
    let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    let due_ms = last_fired.timestamp_millis().saturating_add(interval_ms);
    let remaining = due_ms.saturating_sub(now.timestamp_millis());
    Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatus {
    pub enabled: bool,
    pub running: bool,
    pub permission: Permission,
    pub last_fired: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
}

struct Shared {
    settings: NotificationSettings,
    next_fire: Option<DateTime<Utc>>,
}

pub struct NotificationScheduler {
    notifier: Arc<dyn Notifier>,
    tasks: watch::Receiver<Vec<Task>>,
    shared: Arc<Mutex<Shared>>,
    settings_path: PathBuf,
    interval: Duration,
    cycle: Option<JoinHandle<()>>,
}

impl NotificationScheduler {
    /// `tasks` is the task store's snapshot channel; each reminder reads
    /// whatever is current when it fires.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        tasks: watch::Receiver<Vec<Task>>,
        settings_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let settings_path = settings_path.into();
        let settings = NotificationSettings::load(&settings_path)?;
        Ok(Self {
            notifier,
            tasks,
            shared: Arc::new(Mutex::new(Shared {
                settings,
                next_fire: None,
            })),
            settings_path,
            interval: REMINDER_INTERVAL,
            cycle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.cycle.as_ref().is_some_and(|cycle| !cycle.is_finished())
    }

    pub fn settings(&self) -> NotificationSettings {
        self.lock().settings.clone()
    }

    /// Ask for permission and start reminding. Asking twice is harmless.
    pub fn enable(&mut self) -> Result<()> {
        let newly_granted = match self.notifier.permission() {
            Permission::Granted => false,
            Permission::Denied => return Err(denied()),
            Permission::Default => match self.notifier.request_permission() {
                Permission::Granted => true,
                _ => return Err(denied()),
            },
        };

        {
            let mut shared = self.lock();
            shared.settings.enabled = true;
            shared.settings.save(&self.settings_path)?;
        }
        if newly_granted && let Err(e) = self.notifier.show(&Reminder::Welcome) {
            warn!("Failed to show welcome reminder: {}", e);
        }

        self.start();
        info!("Reminders enabled");
        Ok(())
    }

    /// Stop reminding. The last firing time is kept.
    pub fn disable(&mut self) -> Result<()> {
        self.stop();
        let mut shared = self.lock();
        shared.settings.enabled = false;
        shared.next_fire = None;
        shared.settings.save(&self.settings_path)?;
        info!("Reminders disabled");
        Ok(())
    }

    /// Restart the cycle after a restart if reminders were left on.
    /// Returns whether the cycle is running.
    pub fn resume(&mut self) -> bool {
        if !self.lock().settings.enabled {
            return false;
        }
        if self.notifier.permission() != Permission::Granted {
            warn!("Reminders are enabled but notification permission is not granted");
            return false;
        }
        self.start();
        true
    }

    /// Show the current top-priority reminder immediately, outside the cycle.
    pub fn trigger_now(&self) -> Result<Reminder> {
        if self.notifier.permission() != Permission::Granted {
            return Err(denied());
        }
        let reminder = Reminder::for_tasks(&self.tasks.borrow());
        self.notifier.show(&reminder)?;
        Ok(reminder)
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        if !self.is_running() {
            return None;
        }
        self.lock().next_fire
    }

    pub fn status(&self) -> NotificationStatus {
        let running = self.is_running();
        let shared = self.lock();
        NotificationStatus {
            enabled: shared.settings.enabled,
            running,
            permission: self.notifier.permission(),
            last_fired: shared.settings.last_fired,
            next_fire: if running { shared.next_fire } else { None },
        }
    }

    fn start(&mut self) {
        self.stop();

        let now = Utc::now();
        let delay = {
            let mut shared = self.lock();
            let delay = next_delay(shared.settings.last_fired, now, self.interval);
            shared.next_fire = chrono::Duration::from_std(delay).ok().map(|d| now + d);
            delay
        };
        debug!("Next reminder in {} minutes", delay.as_secs() / 60);

        self.cycle = Some(tokio::spawn(run_cycle(
            Arc::clone(&self.notifier),
            self.tasks.clone(),
            Arc::clone(&self.shared),
            self.settings_path.clone(),
            delay,
            self.interval,
        )));
    }

    fn stop(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            cycle.abort();
            debug!("Reminder cycle stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn denied() -> Error {
    Error::Permission("notification permission was denied".into())
}

async fn run_cycle(
    notifier: Arc<dyn Notifier>,
    tasks: watch::Receiver<Vec<Task>>,
    shared: Arc<Mutex<Shared>>,
    settings_path: PathBuf,
    delay: Duration,
    interval: Duration,
) {
    tokio::time::sleep(delay).await;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        let shown = if notifier.permission() == Permission::Granted {
            let reminder = Reminder::for_tasks(&tasks.borrow());
            match notifier.show(&reminder) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to show reminder: {}", e);
                    false
                }
            }
        } else {
            warn!("Skipping reminder, notification permission was revoked");
            false
        };

        let now = Utc::now();
        {
            let mut state = shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.next_fire = chrono::Duration::from_std(interval).ok().map(|d| now + d);
            if shown {
                state.settings.last_fired = Some(now);
                if let Err(e) = state.settings.save(&settings_path) {
                    warn!("Failed to record reminder time: {}", e);
                }
            }
        }
    }
}
