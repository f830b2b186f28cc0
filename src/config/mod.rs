mod file_config;

pub use file_config::{FileConfig, SyncConfig};

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::download_queue::MAX_CONCURRENT_CEILING;

/// Endpoint used when neither the CLI nor the config file names one.
pub const DEFAULT_API_URL: &str = "https://api.meetstream.ai/graphql";

/// Environment variable consulted for the API credential so it can stay
/// out of argv and shell history.
pub const API_KEY_ENV: &str = "MEETVAULT_API_KEY";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
    pub api_url: String,
    pub api_key: Option<String>,
    pub max_concurrent: u32,
    pub requests_per_minute: u32,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            storage_root: None,
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            max_concurrent: 3,
            requests_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub data_dir: PathBuf,
    pub storage_root: PathBuf,
    pub api_url: String,
    pub api_key: Option<String>,

    // Sync engine settings (with defaults)
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        if !data_dir.exists() {
            fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let storage_root = file
            .storage_root
            .map(PathBuf::from)
            .or_else(|| cli.storage_root.clone())
            .unwrap_or_else(|| data_dir.join("vault"));

        let api_url = file.api_url.unwrap_or_else(|| cli.api_url.clone());
        if api_url.is_empty() {
            bail!("api_url must not be empty");
        }

        // Credential resolution: TOML, then CLI, then environment. A blank
        // value counts as absent and falls through to the next source.
        let api_key = file
            .api_key
            .filter(|key| !key.is_empty())
            .or_else(|| cli.api_key.clone().filter(|key| !key.is_empty()))
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()));

        // Sync settings - merge file config with defaults
        let sync_file = file.sync.unwrap_or_default();
        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            max_concurrent: sync_file.max_concurrent.unwrap_or(cli.max_concurrent),
            requests_per_minute: sync_file
                .requests_per_minute
                .unwrap_or(cli.requests_per_minute),
            max_retries: sync_file.max_retries.unwrap_or(defaults.max_retries),
            discovery_window_years: sync_file
                .discovery_window_years
                .unwrap_or(defaults.discovery_window_years),
            page_size: sync_file.page_size.unwrap_or(defaults.page_size),
            job_spacing_ms: sync_file.job_spacing_ms.unwrap_or(defaults.job_spacing_ms),
            request_timeout_secs: sync_file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            download_timeout_secs: sync_file
                .download_timeout_secs
                .unwrap_or(defaults.download_timeout_secs),
            discovery_interval_mins: sync_file
                .discovery_interval_mins
                .unwrap_or(defaults.discovery_interval_mins),
            reconcile_interval_mins: sync_file
                .reconcile_interval_mins
                .unwrap_or(defaults.reconcile_interval_mins),
        };

        if sync.max_concurrent == 0 || sync.max_concurrent as usize > MAX_CONCURRENT_CEILING {
            bail!(
                "max_concurrent must be between 1 and {}, got {}",
                MAX_CONCURRENT_CEILING,
                sync.max_concurrent
            );
        }
        if sync.requests_per_minute == 0 {
            bail!("requests_per_minute must be at least 1");
        }
        if sync.discovery_window_years == 0 {
            bail!("discovery_window_years must be at least 1");
        }
        if sync.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if sync.discovery_interval_mins == 0 || sync.reconcile_interval_mins == 0 {
            bail!("daemon intervals must be at least 1 minute");
        }

        Ok(Self {
            data_dir,
            storage_root,
            api_url,
            api_key,
            sync,
        })
    }

    pub fn meetings_db_path(&self) -> PathBuf {
        self.data_dir.join("meetings.db")
    }

    /// Credential for commands that talk to the remote.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!(
                "API key must be provided via --api-key, the config file, or the {} environment variable",
                API_KEY_ENV
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_concurrent: u32,
    pub requests_per_minute: u32,
    pub max_retries: u32,
    pub discovery_window_years: u32,
    pub page_size: u32,
    pub job_spacing_ms: u64,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub discovery_interval_mins: u64,
    pub reconcile_interval_mins: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            requests_per_minute: 30,
            max_retries: 3,
            discovery_window_years: 2,
            page_size: 50,
            job_spacing_ms: 500,
            request_timeout_secs: 30,
            download_timeout_secs: 600, // 10 minutes for full audio files
            discovery_interval_mins: 15,
            reconcile_interval_mins: 60,
        }
    }
}
