use anyhow::{Result, anyhow};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Environment variable that relocates the whole data directory.
pub const HOME_ENV_VAR: &str = "TASKWISE_HOME";

pub fn get_taskwise_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(HOME_ENV_VAR)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(home.join(".taskwise"))
}

pub fn get_config_path() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("config.toml"))
}

pub fn get_database_path() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("tasks.db"))
}

pub fn get_session_path() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("session.json"))
}

pub fn get_notifications_path() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("notifications.json"))
}

/// Guest task files, one per guest id.
pub fn get_guest_dir() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("guest"))
}

pub fn get_logs_dir() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("logs"))
}

pub fn get_crash_log_path() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;
    Ok(taskwise_dir.join("crash.log"))
}

pub fn ensure_data_dir_exists() -> Result<PathBuf> {
    let taskwise_dir = get_taskwise_dir()?;

    if !taskwise_dir.exists() {
        fs::create_dir_all(&taskwise_dir)?;
    }

    Ok(taskwise_dir)
}
