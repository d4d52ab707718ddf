use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse stored credentials: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(String),
}

impl From<keyring::Error> for StorageError {
    fn from(e: keyring::Error) -> Self {
        match e {
            keyring::Error::NoStorageAccess(inner) => StorageError::Unavailable(inner.to_string()),
            keyring::Error::PlatformFailure(inner) => StorageError::Unavailable(inner.to_string()),
            other => StorageError::Keyring(other.to_string()),
        }
    }
}

impl StorageError {
    /// Whether the backend itself is missing or refusing access, as opposed
    /// to a single operation failing
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
