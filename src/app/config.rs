use crate::download::queue::QueueConfig;
use crate::engine::EngineSettings;
use crate::session::path::DEFAULT_BASE_FOLDER;
use crate::util::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration (saved to {config_dir}/settings.toml)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Top-level folder every session is written under
    pub base_folder: String,
    pub marketplace: String,
    /// Local root the session folders are created in
    pub download_directory: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            marketplace: "DE".to_string(),
            download_directory: paths::resolve_default_download_directory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_concurrent: usize,
    pub inter_item_delay_ms: u64,
    /// 0 disables the per-minute throttle
    pub per_minute_throttle: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub pause_on_error: bool,
    pub retry_failed: bool,
    /// Tune concurrency and delays from recent failures
    pub adaptive: bool,
    pub max_pages: u32,
    pub user_agent: String,
    /// Base for relative document locators
    pub base_url: Option<String>,
    pub headers: HashMap<String, String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            inter_item_delay_ms: 1000,
            per_minute_throttle: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            pause_on_error: false,
            retry_failed: true,
            adaptive: true,
            max_pages: crate::pagination::machine::DEFAULT_MAX_PAGES,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            base_url: None,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub root_folder_id: String,
    /// Directory backing the filesystem remote (e.g. a synced drive)
    pub mirror_directory: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root_folder_id: crate::remote::local::ROOT_FOLDER_ID.to_string(),
            mirror_directory: None,
        }
    }
}

impl Config {
    /// Load from the discovered config directory, defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        let config_path = paths::get_app_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !config_path.exists() {
            tracing::info!("Application config not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .context(format!("Failed to read {:?}", config_path))?;
        let mut config: Config = toml::from_str(&content)
            .context(format!("Failed to parse {:?}", config_path))?;

        // Relative mirror directories are relative to the config directory
        if let (Some(dir), Some(config_dir)) =
            (&config.remote.mirror_directory, config_path.parent())
        {
            if dir.is_relative() {
                config.remote.mirror_directory = Some(config_dir.join(dir));
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = paths::get_app_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        self.validate()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;

        // Atomic write using temp file + rename
        let temp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content).context("Failed to write temp config file")?;
        std::fs::rename(&temp_path, config_path).context("Failed to rename temp config file")?;

        tracing::info!("Saved application config to {:?}", config_path);
        Ok(())
    }

    /// Collect every invalid setting into one error
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        if self.general.marketplace.trim().is_empty() {
            errors.push("general.marketplace must not be empty".to_string());
        }
        if self.general.base_folder.trim().is_empty() {
            errors.push("general.base_folder must not be empty".to_string());
        }
        if self.download.max_concurrent == 0 {
            errors.push("download.max_concurrent must be at least 1".to_string());
        }
        if self.download.max_pages == 0 {
            errors.push("download.max_pages must be at least 1".to_string());
        }
        if let Some(base) = &self.download.base_url {
            if let Err(e) = url::Url::parse(base) {
                errors.push(format!("download.base_url is invalid: {}", e));
            }
        }
        if self.remote.enabled && self.remote.mirror_directory.is_none() {
            errors.push("remote.mirror_directory is required when remote.enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Invalid configuration: {}", errors.join(", ")))
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        let d = &self.download;
        QueueConfig {
            max_concurrent: d.max_concurrent.max(1),
            inter_item_delay: Duration::from_millis(d.inter_item_delay_ms),
            per_minute_throttle: d.per_minute_throttle,
            max_retries: d.max_retries,
            retry_delay: Duration::from_millis(d.retry_delay_ms),
            pause_on_error: d.pause_on_error,
            retry_failed: d.retry_failed,
        }
    }

    /// Engine settings with logs and history under `config_dir`
    pub fn engine_settings(&self, config_dir: &Path) -> EngineSettings {
        EngineSettings {
            marketplace: self.general.marketplace.trim().to_uppercase(),
            base_folder: self.general.base_folder.clone(),
            download_root: self.general.download_directory.clone(),
            queue: self.queue_config(),
            adaptive: self.download.adaptive,
            max_pages: self.download.max_pages,
            logs_dir: Some(config_dir.join(paths::LOGS_DIR)),
            history_path: Some(config_dir.join(paths::HISTORY_FILE)),
        }
    }
}
