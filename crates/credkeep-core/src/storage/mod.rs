//! Durable storage backends for the session credential.
//!
//! This module provides:
//! - `CredentialStorage`: the synchronous read/write/remove capability the
//!   authority persists through
//! - `FileStorage`: a JSON document in the data directory
//! - `KeyringStorage`: OS-level keychain entries via keyring
//! - `MemoryStorage`: a shared in-process map (tests, ephemeral sessions)
//! - `UnavailableStorage`: a backend that rejects every call
//!
//! Every backend is addressed by a single key per credential entry.

pub mod error;
pub mod file;
pub mod keychain;
pub mod memory;

pub use error::StorageError;
pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::{MemoryStorage, UnavailableStorage};

/// Key under which the session credential is stored by default
pub const DEFAULT_STORAGE_KEY: &str = "auth_token";

/// Synchronous key-value storage the credential authority persists to.
///
/// Implementations must be cheap to call and must not block for long; the
/// authority calls them while holding its state lock.
pub trait CredentialStorage: Send + Sync {
    /// Read the value stored under `key`, `Ok(None)` if nothing is stored.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the entry for `key`. Removing a missing entry is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Short backend name for log output
    fn name(&self) -> &'static str;
}

impl<S: CredentialStorage + ?Sized> CredentialStorage for Box<S> {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
