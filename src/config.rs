use crate::constants;
use crate::error::{EtlError, Result};
use chrono::Datelike;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub load: LoadConfig,
    pub paths: PathsConfig,
    pub extract: ExtractConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub operators_url: String,
    pub statements_base_url: String,
    pub annexes_page_url: String,
    /// Fiscal years whose statement archives are fetched. Empty means the
    /// two years preceding the current one.
    pub years: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// External table-extraction command. Must accept a PDF path and emit
    /// tabula-style JSON on stdout.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            load: LoadConfig::default(),
            paths: PathsConfig::default(),
            extract: ExtractConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            operators_url: constants::OPERATORS_URL.to_string(),
            statements_base_url: constants::STATEMENTS_BASE_URL.to_string(),
            annexes_page_url: constants::ANNEXES_PAGE_URL.to_string(),
            years: Vec::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5,
            timeout_secs: 60,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            command: "tabula".to_string(),
            args: vec![
                "--pages".to_string(),
                "all".to_string(),
                "--lattice".to_string(),
                "--format".to_string(),
                "JSON".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `config.toml` when present, otherwise falls back to the
    /// built-in defaults.
    pub fn load_or_default(path: &str) -> Self {
        if fs::metadata(path).is_err() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}; using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Fiscal years to fetch: configured list, or the two years before the
    /// current one when the list is empty.
    pub fn statement_years(&self) -> Vec<i32> {
        if !self.source.years.is_empty() {
            return self.source.years.clone();
        }
        let current = chrono::Utc::now().year();
        vec![current - 1, current - 2]
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.paths.data_root.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.paths.data_root.join("processed")
    }
}
