use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CredentialStorage, StorageError};

/// Credentials file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

/// Stores credential entries in a single JSON document on disk.
///
/// The file is rewritten on every change. Removing the last entry deletes
/// the file so nothing is left behind after a logout.
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    /// When the entry for `key` was last written, if it exists
    pub fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let doc = self.load()?;
        Ok(doc.entries.get(key).map(|e| e.stored_at))
    }

    fn load(&self) -> Result<CredentialsDocument, StorageError> {
        let path = self.path();
        if !path.exists() {
            return Ok(CredentialsDocument::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, doc: &CredentialsDocument) -> Result<(), StorageError> {
        let path = self.path();
        if doc.entries.is_empty() {
            return remove_if_exists(&path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(doc)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl CredentialStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let doc = self.load()?;
        Ok(doc.entries.get(key).map(|e| e.value.clone()))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut doc = self.load().unwrap_or_else(|e| {
            // A corrupt document is replaced rather than blocking every write
            debug!(error = %e, "Discarding unreadable credentials file");
            CredentialsDocument::default()
        });
        doc.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                stored_at: Utc::now(),
            },
        );
        self.save(&doc)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut doc = match self.load() {
            Ok(doc) => doc,
            Err(StorageError::Serialization(_)) => {
                debug!("Removing unreadable credentials file");
                return remove_if_exists(&self.path());
            }
            Err(e) => return Err(e),
        };
        if doc.entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&doc)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
