//! Client configuration
//!
//! Loaded from `cloudant-sync.toml`, with an optional `.env` file and
//! environment variable overrides applied on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::conflict::ResolverFailurePolicy;

pub const CONFIG_FILE_NAME: &str = "cloudant-sync.toml";
pub const DEFAULT_DIRECTORY_NAME: &str = "CloudantSync";

const ENV_PATH: &str = "CLOUDANT_SYNC_PATH";
const ENV_PLATFORM: &str = "CLOUDANT_SYNC_PLATFORM";
const ENV_CLOSE_ALWAYS_SUCCEEDS: &str = "CLOUDANT_SYNC_CLOSE_ALWAYS_SUCCEEDS";

/// Host platform of the native engine. Close semantics differ per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else {
            Platform::Other
        }
    }

    /// The iOS engine treats every close as successful.
    pub fn close_always_succeeds(&self) -> bool {
        matches!(self, Platform::Ios)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "android" => Some(Platform::Android),
            "ios" => Some(Platform::Ios),
            "other" => Some(Platform::Other),
            _ => None,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::current()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory datastore managers live in when no path is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub platform: Platform,

    /// Overrides the platform's close semantics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_always_succeeds: Option<bool>,

    #[serde(default)]
    pub resolver_failure: ResolverFailurePolicy,
}

impl ClientConfig {
    /// Load configuration from a directory
    ///
    /// Loads a `.env` file from the directory if present, reads
    /// `cloudant-sync.toml`, then applies environment overrides.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            anyhow::bail!("Configuration file not found: {}", config_path.display());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::write(dir.join(CONFIG_FILE_NAME), self.to_toml_string()?)?;
        Ok(())
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_PATH).filter(|p| !p.is_empty()) {
            self.path = Some(PathBuf::from(path));
        }

        if let Some(platform) = lookup(ENV_PLATFORM).as_deref().and_then(Platform::parse) {
            self.platform = platform;
        }

        if let Some(flag) = lookup(ENV_CLOSE_ALWAYS_SUCCEEDS) {
            match flag.trim() {
                "1" | "true" => self.close_always_succeeds = Some(true),
                "0" | "false" => self.close_always_succeeds = Some(false),
                _ => {}
            }
        }
    }

    pub fn close_always_succeeds(&self) -> bool {
        self.close_always_succeeds
            .unwrap_or_else(|| self.platform.close_always_succeeds())
    }

    /// `path`, or `<data dir>/CloudantSync`.
    pub fn default_manager_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => normalize_path(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
                .join(DEFAULT_DIRECTORY_NAME),
        }
    }
}

/// Strips a leading `file://` scheme from a path handed over as a URL.
pub fn normalize_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix("file://") {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}
