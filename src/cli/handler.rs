use super::error;
use super::interrupt::{self, PromptingSink};
use super::output;
use super::{Commands, ConfigAction};
use crate::app::config::Config;
use crate::download::errors::EngineError;
use crate::download::pipeline::MirrorTarget;
use crate::download::transfer::HttpTransfer;
use crate::engine::{EngineRequest, EngineResponse, Orchestrator};
use crate::pagination::{DateWindow, PageDirectory, PaginationMachine};
use crate::remote::{FolderResolver, LocalMirrorService};
use crate::store::{FileStore, KeyValueStore};
use crate::util::paths;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle a CLI command and return exit code
pub async fn handle_command(command: Commands, config: Config, config_dir: PathBuf) -> i32 {
    let result = match command {
        Commands::Collect {
            pages,
            start,
            end,
            label,
        } => handle_collect(&config, &config_dir, pages, &start, &end, label).await,
        Commands::Resume { pages } => handle_resume(&config, &config_dir, pages).await,
        Commands::Status { json } => handle_status(&config, &config_dir, json).await,
        Commands::Clear => handle_clear(&config, &config_dir).await,
        Commands::History { json } => handle_history(&config, &config_dir, json).await,
        Commands::Config { action } => handle_config(action, config, &config_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<EngineError>() {
        Some(EngineError::InvalidWindow(_)) | Some(EngineError::AlreadyRunning(_)) => {
            error::INVALID_INPUT
        }
        _ => error::ERROR,
    }
}

fn open_store(config_dir: &Path) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(config_dir.join(paths::STATE_FILE)))
}

/// Orchestrator wired from configuration, with the queue-pause signal
struct Wired {
    engine: Arc<Orchestrator>,
    paused: mpsc::UnboundedReceiver<()>,
}

/// Wire the orchestrator from configuration
fn build_engine(
    config: &Config,
    config_dir: &Path,
    store: Arc<dyn KeyValueStore>,
    pages: Option<PageDirectory>,
) -> Result<Wired> {
    let mut transfer = HttpTransfer::with_user_agent(&config.download.user_agent)?
        .with_headers(&config.download.headers)?;
    if let Some(base) = &config.download.base_url {
        transfer = transfer.with_base_url(base)?;
    }

    let (sink, paused) = PromptingSink::new();
    let mut engine = Orchestrator::new(
        config.engine_settings(config_dir),
        store,
        Arc::new(transfer),
    )
    .with_sink(Arc::new(sink));

    if config.remote.enabled {
        let mirror_dir = config
            .remote
            .mirror_directory
            .clone()
            .context("remote.mirror_directory is not set")?;
        std::fs::create_dir_all(&mirror_dir)
            .context(format!("Failed to create mirror directory {:?}", mirror_dir))?;
        tracing::info!("Mirroring sessions to {:?}", mirror_dir);
        engine = engine.with_mirror(MirrorTarget {
            resolver: FolderResolver::new(Arc::new(LocalMirrorService::new(mirror_dir))),
            root_folder_id: config.remote.root_folder_id.clone(),
        });
    }

    if let Some(pages) = pages {
        engine = engine.with_pages(Arc::new(pages));
    }

    Ok(Wired {
        engine: Arc::new(engine),
        paused,
    })
}

/// Drive the run to hand-off
///
/// Ctrl+C stops the queue; a pause after a failure waits for Enter.
async fn run_to_completion(wired: Wired) -> Result<i32> {
    let Wired { engine, paused } = wired;
    let ctrl_c = interrupt::stop_on_ctrl_c(engine.clone());
    let prompt = interrupt::resume_on_prompt(engine.clone(), paused);
    let response = engine.drive().await;
    ctrl_c.abort();
    prompt.abort();

    match response? {
        EngineResponse::SessionFinished(record) => Ok(error::for_session(record.status)),
        EngineResponse::Idle => {
            println!("No collection in progress.");
            Ok(error::NOT_FOUND)
        }
        EngineResponse::StaleCleared => {
            println!("Found an empty, unfinished collection and discarded it.");
            Ok(error::NOT_FOUND)
        }
        other => Err(anyhow::anyhow!("Unexpected engine response: {:?}", other)),
    }
}

async fn handle_collect(
    config: &Config,
    config_dir: &Path,
    pages: PathBuf,
    start: &str,
    end: &str,
    label: Option<String>,
) -> Result<i32> {
    let window = DateWindow::parse(start, end)?;
    if !pages.is_dir() {
        eprintln!("Pages directory not found: {}", pages.display());
        return Ok(error::NOT_FOUND);
    }

    let store = open_store(config_dir);
    let wired = build_engine(config, config_dir, store, Some(PageDirectory::open(&pages, 1)))?;

    let started = wired
        .engine
        .handle(EngineRequest::StartCollection {
            window,
            range_label: label.unwrap_or_default(),
        })
        .await;
    if let Err(EngineError::AlreadyRunning(page)) = &started {
        eprintln!(
            "A collection is already in progress at page {}. Use `igrab resume` or `igrab clear`.",
            page
        );
    }
    started?;

    run_to_completion(wired).await
}

async fn handle_resume(config: &Config, config_dir: &Path, pages: Option<PathBuf>) -> Result<i32> {
    let store = open_store(config_dir);

    // The new context opens on the page the previous one navigated to
    let current_page = PaginationMachine::new(store.clone())
        .load()
        .await?
        .map(|state| state.current_page)
        .unwrap_or(1);
    let pages = pages.map(|dir| PageDirectory::open(dir, current_page));

    let wired = build_engine(config, config_dir, store, pages)?;
    run_to_completion(wired).await
}

async fn handle_status(config: &Config, config_dir: &Path, json: bool) -> Result<i32> {
    let engine = build_engine(config, config_dir, open_store(config_dir), None)?.engine;
    let EngineResponse::Status(status) = engine.handle(EngineRequest::Status).await? else {
        return Err(anyhow::anyhow!("Unexpected engine response"));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", output::format_status(&status));
    }
    Ok(error::SUCCESS)
}

async fn handle_clear(config: &Config, config_dir: &Path) -> Result<i32> {
    let engine = build_engine(config, config_dir, open_store(config_dir), None)?.engine;
    match engine.handle(EngineRequest::ClearState).await? {
        EngineResponse::Cleared { had_state: true } => Ok(error::SUCCESS),
        _ => {
            println!("No collection in progress.");
            Ok(error::NOT_FOUND)
        }
    }
}

async fn handle_history(config: &Config, config_dir: &Path, json: bool) -> Result<i32> {
    let engine = build_engine(config, config_dir, open_store(config_dir), None)?.engine;
    let EngineResponse::History(records) = engine.handle(EngineRequest::History).await? else {
        return Err(anyhow::anyhow!("Unexpected engine response"));
    };
    println!("{}", output::format_history(&records, json));
    Ok(error::SUCCESS)
}

fn handle_config(action: ConfigAction, mut config: Config, config_dir: &Path) -> Result<i32> {
    match action {
        ConfigAction::Get { key } => {
            let value = get_config_value(&config, &key)?;
            println!("{}", value);
            Ok(error::SUCCESS)
        }
        ConfigAction::Set { key, value } => {
            if let Err(e) = set_config_value(&mut config, &key, &value) {
                eprintln!("Error: {}", e);
                return Ok(error::INVALID_INPUT);
            }
            config.save_to(&config_dir.join(paths::SETTINGS_FILE))?;
            println!("Configuration updated: {} = {}", key, value);
            Ok(error::SUCCESS)
        }
        ConfigAction::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(error::SUCCESS)
        }
        ConfigAction::Path => {
            println!("{}", config_dir.display());
            Ok(error::SUCCESS)
        }
    }
}

/// Get configuration value by dot notation key
fn get_config_value(config: &Config, key: &str) -> Result<String> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "base_folder"] => Ok(config.general.base_folder.clone()),
        ["general", "marketplace"] => Ok(config.general.marketplace.clone()),
        ["general", "download_directory"] => {
            Ok(config.general.download_directory.display().to_string())
        }
        ["download", "max_concurrent"] => Ok(config.download.max_concurrent.to_string()),
        ["download", "inter_item_delay_ms"] => Ok(config.download.inter_item_delay_ms.to_string()),
        ["download", "per_minute_throttle"] => Ok(config.download.per_minute_throttle.to_string()),
        ["download", "max_retries"] => Ok(config.download.max_retries.to_string()),
        ["download", "retry_delay_ms"] => Ok(config.download.retry_delay_ms.to_string()),
        ["download", "pause_on_error"] => Ok(config.download.pause_on_error.to_string()),
        ["download", "retry_failed"] => Ok(config.download.retry_failed.to_string()),
        ["download", "adaptive"] => Ok(config.download.adaptive.to_string()),
        ["download", "max_pages"] => Ok(config.download.max_pages.to_string()),
        ["download", "user_agent"] => Ok(config.download.user_agent.clone()),
        ["download", "base_url"] => Ok(config.download.base_url.clone().unwrap_or_default()),
        ["remote", "enabled"] => Ok(config.remote.enabled.to_string()),
        ["remote", "root_folder_id"] => Ok(config.remote.root_folder_id.clone()),
        ["remote", "mirror_directory"] => Ok(config
            .remote
            .mirror_directory
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

/// Set configuration value by dot notation key
fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());

    match parts.as_slice() {
        ["general", "base_folder"] => config.general.base_folder = value.to_string(),
        ["general", "marketplace"] => config.general.marketplace = value.to_uppercase(),
        ["general", "download_directory"] => {
            config.general.download_directory = PathBuf::from(value)
        }
        ["download", "max_concurrent"] => config.download.max_concurrent = value.parse()?,
        ["download", "inter_item_delay_ms"] => {
            config.download.inter_item_delay_ms = value.parse()?
        }
        ["download", "per_minute_throttle"] => {
            config.download.per_minute_throttle = value.parse()?
        }
        ["download", "max_retries"] => config.download.max_retries = value.parse()?,
        ["download", "retry_delay_ms"] => config.download.retry_delay_ms = value.parse()?,
        ["download", "pause_on_error"] => config.download.pause_on_error = value.parse()?,
        ["download", "retry_failed"] => config.download.retry_failed = value.parse()?,
        ["download", "adaptive"] => config.download.adaptive = value.parse()?,
        ["download", "max_pages"] => config.download.max_pages = value.parse()?,
        ["download", "user_agent"] => config.download.user_agent = value.to_string(),
        ["download", "base_url"] => config.download.base_url = optional(value),
        ["remote", "enabled"] => config.remote.enabled = value.parse()?,
        ["remote", "root_folder_id"] => config.remote.root_folder_id = value.to_string(),
        ["remote", "mirror_directory"] => {
            config.remote.mirror_directory = optional(value).map(PathBuf::from)
        }
        _ => return Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }

    config.validate()
}
