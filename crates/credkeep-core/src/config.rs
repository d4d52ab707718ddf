//! Application configuration management.
//!
//! This module handles loading and saving the configuration, which selects
//! the storage backend the credential is persisted to, the storage key, and
//! where files and logs live.
//!
//! Configuration is stored at `~/.config/credkeep/config.json`. Environment
//! variables (`CREDKEEP_STORAGE`, `CREDKEEP_STORAGE_KEY`, `CREDKEEP_DATA_DIR`,
//! `CREDKEEP_API_BASE_URL`) override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::CredentialAuthority;
use crate::storage::{
    CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, DEFAULT_STORAGE_KEY,
};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "credkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const ENV_STORAGE: &str = "CREDKEEP_STORAGE";
const ENV_STORAGE_KEY: &str = "CREDKEEP_STORAGE_KEY";
const ENV_DATA_DIR: &str = "CREDKEEP_DATA_DIR";
const ENV_API_BASE_URL: &str = "CREDKEEP_API_BASE_URL";

/// Where the session credential is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "memory" | "none" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageBackend,
    pub storage_key: String,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            data_dir: None,
            log_dir: None,
            api_base_url: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing) and apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(storage) = lookup(ENV_STORAGE) {
            match storage.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_STORAGE),
            }
        }
        if let Some(key) = lookup(ENV_STORAGE_KEY).filter(|k| !k.is_empty()) {
            self.storage_key = key;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|u| !u.is_empty()) {
            self.api_base_url = Some(url);
        }
    }

    /// Directory holding the file storage backend's credentials file
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Build the configured storage backend
    pub fn build_storage(&self) -> Result<Box<dyn CredentialStorage>> {
        Ok(match self.storage {
            StorageBackend::File => Box::new(FileStorage::new(self.data_dir()?)),
            StorageBackend::Keyring => Box::new(KeyringStorage::default()),
            StorageBackend::Memory => Box::new(MemoryStorage::new()),
        })
    }

    /// Build a credential authority over the configured backend
    pub fn build_authority(&self) -> Result<CredentialAuthority> {
        let storage = self.build_storage()?;
        Ok(CredentialAuthority::with_key(storage, self.storage_key.clone()))
    }
}
