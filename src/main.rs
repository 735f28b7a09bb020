mod api;
mod cli;

use taskwise::config::Config;
use taskwise::notify::{ConsoleNotifier, NotificationScheduler, Notifier};
use taskwise::session::{MigrationOutcome, SessionManager};
use taskwise::storage::{Backends, LocalBackend, RemoteBackend, TaskBackend, TaskStore};
use taskwise::task::{Filter, Priority, Task, TaskId, TaskStats, render};
use taskwise::utils::paths::{
    ensure_data_dir_exists, get_crash_log_path, get_database_path, get_guest_dir, get_logs_dir,
    get_notifications_path, get_session_path,
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use clap::Parser;
use cli::{Cli, Commands, NotifyCommand, PriorityArgs};
use std::fs;
use std::io::Write;
use std::panic;
use std::sync::Arc;

/// Install a panic hook that writes crash information to a log file
fn install_crash_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        if let Ok(crash_log_path) = get_crash_log_path() {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let mut crash_report = format!("=== CRASH at {} ===\n", timestamp);

            if let Some(message) = panic_info.payload().downcast_ref::<&str>() {
                crash_report.push_str(&format!("Message: {}\n", message));
            } else if let Some(message) = panic_info.payload().downcast_ref::<String>() {
                crash_report.push_str(&format!("Message: {}\n", message));
            }

            if let Some(location) = panic_info.location() {
                crash_report.push_str(&format!(
                    "Location: {}:{}:{}\n",
                    location.file(),
                    location.line(),
                    location.column()
                ));
            }

            crash_report.push_str(&format!(
                "\nBacktrace:\n{}\n\n",
                std::backtrace::Backtrace::force_capture()
            ));

            if let Ok(mut file) = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log_path)
            {
                let _ = file.write_all(crash_report.as_bytes());
                eprintln!("\nCrash logged to: {}", crash_log_path.display());
            }
        }

        default_hook(panic_info);
    }));
}

/// File logging for one-shot commands, so their output stays clean.
///
/// Logs roll daily under `~/.taskwise/logs/`. Level comes from RUST_LOG
/// (default: info).
fn init_file_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = get_logs_dir().ok()?;

    if let Err(e) = fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Could not create logs directory: {}", e);
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "taskwise.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Some(guard)
}

fn main() -> Result<()> {
    install_crash_handler();
    ensure_data_dir_exists()?;

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            run_server(config)
        }
        command => {
            let _log_guard = init_file_logging();
            tracing::info!("taskwise starting");
            run_command(command, config)
        }
    }
}

async fn open_session() -> Result<SessionManager> {
    let local: Arc<dyn TaskBackend> = Arc::new(LocalBackend::new(get_guest_dir()?));
    let database_path = get_database_path()?;
    let remote: Arc<dyn TaskBackend> = Arc::new(
        RemoteBackend::open(&database_path)
            .with_context(|| format!("Failed to open {}", database_path.display()))?,
    );

    let store = TaskStore::new(Backends::new(local, remote));
    SessionManager::restore(store, get_session_path()?)
        .await
        .context("Failed to restore session")
}

fn open_reminders(config: &Config, session: &SessionManager) -> Result<NotificationScheduler> {
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new(config.notifications.permitted));
    let scheduler = NotificationScheduler::new(
        notifier,
        session.store().subscribe(),
        get_notifications_path()?,
    )?;
    Ok(scheduler)
}

#[tokio::main]
async fn run_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let session = open_session().await?;
    let mut reminders = open_reminders(&config, &session)?;
    if reminders.resume() {
        tracing::info!("Reminder cycle resumed");
    }

    let addr = config.bind_address();
    let app = api::create_router(api::AppState::new(session, reminders, config));

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("taskwise server shutting down");
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn run_command(command: Commands, config: Config) -> Result<()> {
    let mut session = open_session().await?;

    match command {
        Commands::Serve { .. } => bail!("`serve` cannot run as a one-shot command"),
        Commands::Add { text, priority } => handle_add(&session, &text, &priority).await,
        Commands::List { filter } => handle_list(&session, filter),
        Commands::Toggle { id } => handle_toggle(&session, &id).await,
        Commands::Edit { id, text, priority } => {
            handle_edit(&session, &id, text.as_deref(), &priority).await
        }
        Commands::Rm { id } => handle_rm(&session, &id).await,
        Commands::Guest => {
            session.continue_as_guest().await?;
            println!("✓ Continuing as guest. Tasks stay on this device.");
            Ok(())
        }
        Commands::Login { credential } => handle_login(&mut session, &credential).await,
        Commands::Upgrade => {
            let count = session.begin_upgrade().await?;
            println!("✓ {count} guest task(s) ready to move.");
            println!("Run `taskwise login <credential>` to finish.");
            Ok(())
        }
        Commands::Migrate => {
            let copied = session.retry_migration().await?;
            println!("✓ Moved {copied} guest task(s) into your account.");
            Ok(())
        }
        Commands::Logout => {
            session.sign_out().await?;
            println!("✓ Signed out.");
            Ok(())
        }
        Commands::Whoami => {
            handle_whoami(&session);
            Ok(())
        }
        Commands::Notify { command } => handle_notify(command, &config, &session),
    }
}

fn require_bound(session: &SessionManager) -> Result<()> {
    if !session.store().is_bound() {
        bail!("No active session. Run `taskwise guest` or `taskwise login <credential>` first.");
    }
    Ok(())
}

/// Accept a full id or an unambiguous prefix of one.
fn resolve_id(session: &SessionManager, input: &str) -> Result<Task> {
    let tasks = session.store().tasks();
    if let Some(task) = tasks.iter().find(|task| task.id.as_str() == input) {
        return Ok(task.clone());
    }

    let mut matches = tasks.iter().filter(|task| task.id.as_str().starts_with(input));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.clone()),
        (Some(_), Some(_)) => Err(anyhow!("Task id '{input}' is ambiguous")),
        (None, _) => Err(anyhow!("No task matches '{input}'")),
    }
}

fn short_id(id: &TaskId) -> &str {
    let id = id.as_str();
    id.get(..8).unwrap_or(id)
}

fn describe(task: &Task) -> String {
    format!(
        "{} ({}/45)",
        task.priority.level(),
        task.total_score()
    )
}

async fn handle_add(session: &SessionManager, text: &str, priority: &PriorityArgs) -> Result<()> {
    require_bound(session)?;
    let task = session
        .store()
        .create(text, priority.over(Priority::default()))
        .await?;
    println!("✓ Task added [{}] {}", short_id(&task.id), describe(&task));
    Ok(())
}

fn handle_list(session: &SessionManager, filter: Filter) -> Result<()> {
    require_bound(session)?;
    let tasks = session.store().tasks();
    let stats = TaskStats::of(&tasks);
    let visible = render(&tasks, filter);

    if visible.is_empty() {
        println!("No tasks to show ({filter}).");
    }
    for task in &visible {
        let check = if task.completed { "x" } else { " " };
        println!(
            "[{}] {}  {:<6} {:>2}/45  {}",
            check,
            short_id(&task.id),
            task.priority.level(),
            task.total_score(),
            task.text
        );
        println!("              {}", task.priority.summary());
    }
    println!(
        "\n{} total, {} pending, {} completed",
        stats.total, stats.pending, stats.completed
    );
    Ok(())
}

async fn handle_toggle(session: &SessionManager, id: &str) -> Result<()> {
    require_bound(session)?;
    let task = resolve_id(session, id)?;
    match session.store().toggle_completion(&task.id).await? {
        Some(task) if task.completed => println!("✓ Completed: {}", task.text),
        Some(task) => println!("✓ Reopened: {}", task.text),
        None => println!("Task {} no longer exists.", short_id(&task.id)),
    }
    Ok(())
}

async fn handle_edit(
    session: &SessionManager,
    id: &str,
    text: Option<&str>,
    priority: &PriorityArgs,
) -> Result<()> {
    require_bound(session)?;
    if text.is_none() && priority.is_empty() {
        bail!("Nothing to change. Pass --text or a priority factor.");
    }

    let task = resolve_id(session, id)?;
    let new_priority = (!priority.is_empty()).then(|| priority.over(task.priority));
    match session
        .store()
        .update(&task.id, text, new_priority)
        .await?
    {
        Some(task) => println!("✓ Updated [{}] {}", short_id(&task.id), describe(&task)),
        None => println!("Task {} no longer exists.", short_id(&task.id)),
    }
    Ok(())
}

async fn handle_rm(session: &SessionManager, id: &str) -> Result<()> {
    require_bound(session)?;
    let task = resolve_id(session, id)?;
    session.store().remove(&task.id).await?;
    println!("✓ Deleted: {}", task.text);
    Ok(())
}

async fn handle_login(session: &mut SessionManager, credential: &str) -> Result<()> {
    let outcome = session.sign_in(credential).await?;
    println!("✓ Signed in as {}", outcome.profile.name);

    match outcome.migration {
        MigrationOutcome::NotNeeded => {}
        MigrationOutcome::Completed { copied } => {
            println!("✓ Moved {copied} guest task(s) into your account.");
        }
        MigrationOutcome::Failed(e) => {
            eprintln!("Warning: {e}");
            eprintln!("Your guest tasks are kept. Run `taskwise migrate` to try again.");
        }
    }
    Ok(())
}

fn handle_whoami(session: &SessionManager) {
    let identity = session.identity();
    match identity.scope() {
        None => println!("Signed out."),
        Some(scope) => {
            println!("{} ({})", identity.display_name(), session.status());
            println!("Scope: {scope}");
            println!("Tasks: {}", session.store().tasks().len());
        }
    }
    if let Some(pending) = session.pending_migration() {
        println!(
            "{} guest task(s) waiting to move into an account.",
            pending.tasks.len()
        );
    }
}

fn handle_notify(command: NotifyCommand, config: &Config, session: &SessionManager) -> Result<()> {
    let mut reminders = open_reminders(config, session)?;

    match command {
        NotifyCommand::Enable => {
            reminders.enable()?;
            println!("✓ Reminders enabled. They fire every 4 hours while `taskwise serve` runs.");
        }
        NotifyCommand::Disable => {
            reminders.disable()?;
            println!("✓ Reminders disabled.");
        }
        NotifyCommand::Status => {
            let settings = reminders.settings();
            println!("Enabled: {}", if settings.enabled { "yes" } else { "no" });
            match settings.last_fired {
                Some(at) => println!("Last reminder: {}", at.with_timezone(&Local)),
                None => println!("Last reminder: never"),
            }
            if settings.enabled && settings.last_fired.is_some() {
                let next = taskwise::notify::next_delay(
                    settings.last_fired,
                    chrono::Utc::now(),
                    taskwise::notify::REMINDER_INTERVAL,
                );
                println!("Next reminder in: {} minutes", next.as_secs() / 60);
            }
        }
        NotifyCommand::Now => {
            require_bound(session)?;
            reminders.trigger_now()?;
        }
    }
    Ok(())
}
