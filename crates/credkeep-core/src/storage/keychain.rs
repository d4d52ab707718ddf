use keyring::Entry;
use tracing::debug;

use super::{CredentialStorage, StorageError};

/// Default keyring service name
pub const SERVICE_NAME: &str = "credkeep";

/// Stores credential entries in the OS keychain, one entry per key.
pub struct KeyringStorage {
    service_name: String,
}

impl KeyringStorage {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service_name, key)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl CredentialStorage for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service_name, key, "No keyring entry");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}
