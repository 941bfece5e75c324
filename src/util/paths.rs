use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::RwLock;

const APP_DIR_NAME: &str = "invoice-grabber";

pub const SETTINGS_FILE: &str = "settings.toml";
/// Durable key-value store holding pagination state and counters
pub const STATE_FILE: &str = "state.json";
pub const HISTORY_FILE: &str = "history.toml";
pub const LOGS_DIR: &str = "logs";

// Global config directory override (for --config flag and tests)
static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Set config directory override (used by --config flag and tests)
pub fn set_config_dir_override(path: Option<PathBuf>) {
    let mut override_path = CONFIG_DIR_OVERRIDE
        .write()
        .unwrap_or_else(|e| e.into_inner());
    *override_path = path;
}

/// Get current config directory override
pub fn get_config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Find config directory by searching in priority order:
/// 1. Override from --config flag or set_config_dir_override() (created if missing)
/// 2. Environment variable IGRAB_CONFIG_DIR
/// 3. User config directory (`~/.config/invoice-grabber/` on Unix)
/// 4. Current working directory (`./config/`)
///
/// If no config directory is found, creates one in the user config directory.
pub fn find_config_directory() -> Result<PathBuf> {
    // Priority 1: explicit override always wins
    if let Some(override_path) = get_config_dir_override() {
        std::fs::create_dir_all(&override_path)
            .context(format!("Failed to create config directory {:?}", override_path))?;
        tracing::debug!("Using config directory override: {:?}", override_path);
        return Ok(override_path);
    }

    // Priority 2: Environment variable
    if let Ok(env_path) = std::env::var("IGRAB_CONFIG_DIR") {
        let env_config = PathBuf::from(env_path);
        if env_config.exists() {
            tracing::debug!("Found config directory from IGRAB_CONFIG_DIR: {:?}", env_config);
            return Ok(env_config);
        }
    }

    // Priority 3: User config directory (platform standard location)
    if let Ok(user_config) = get_user_config_dir() {
        if user_config.exists() {
            tracing::debug!("Found config directory at: {:?}", user_config);
            return Ok(user_config);
        }
    }

    // Priority 4: Current working directory
    if let Ok(cwd) = std::env::current_dir() {
        let cwd_config = cwd.join("config");
        if cwd_config.exists() {
            tracing::debug!("Found config directory at: {:?}", cwd_config);
            return Ok(cwd_config);
        }
    }

    // Fallback: Create in user config directory
    let user_config = get_user_config_dir()?;
    std::fs::create_dir_all(&user_config).context("Failed to create user config directory")?;
    tracing::info!("Created config directory at: {:?}", user_config);
    Ok(user_config)
}

/// Get platform-specific user config directory
fn get_user_config_dir() -> Result<PathBuf> {
    let base_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine user config directory"))?;
    Ok(base_dir.join(APP_DIR_NAME))
}

/// Get absolute path to settings.toml
pub fn get_app_config_path() -> Result<PathBuf> {
    Ok(find_config_directory()?.join(SETTINGS_FILE))
}

/// Get absolute path to application-wide logs directory
pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(find_config_directory()?.join(LOGS_DIR))
}

/// Resolve the default download directory at runtime.
///
/// Current working directory + "Downloads", falling back to a relative path.
pub fn resolve_default_download_directory() -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => cwd.join("Downloads"),
        Err(_) => PathBuf::from("Downloads"),
    }
}
