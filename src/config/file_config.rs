use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,
    pub storage_root: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,

    // Sync engine tuning
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub max_concurrent: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub max_retries: Option<u32>,
    pub discovery_window_years: Option<u32>,
    pub page_size: Option<u32>,
    pub job_spacing_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub discovery_interval_mins: Option<u64>,
    pub reconcile_interval_mins: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
