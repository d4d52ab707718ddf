//! Process-wide credential authority and free-function accessors.
//!
//! The process has one authority. Install it once at startup with
//! [`install`]; if nothing is installed, the first access builds one from
//! [`Config::load`], falling back to an authority with no durable storage
//! when the configuration or storage backend cannot be set up.
//!
//! Code that can take an explicit handle should prefer [`authority`] and pass
//! the `Arc` along. The free functions exist for call sites that cannot.

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::{CredentialAuthority, CredentialListener};
use crate::config::Config;
use crate::storage::UnavailableStorage;

static AUTHORITY: OnceLock<Arc<CredentialAuthority>> = OnceLock::new();

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("A credential authority is already installed for this process")]
pub struct AlreadyInstalled;

/// Install `authority` as the process-wide authority. Fails if one was
/// already installed or lazily created.
pub fn install(authority: CredentialAuthority) -> Result<Arc<CredentialAuthority>, AlreadyInstalled> {
    let authority = Arc::new(authority);
    AUTHORITY
        .set(authority.clone())
        .map_err(|_| AlreadyInstalled)?;
    debug!(backend = authority.storage_backend(), "Credential authority installed");
    Ok(authority)
}

/// Handle to the process-wide authority, creating it on first use.
pub fn authority() -> &'static Arc<CredentialAuthority> {
    AUTHORITY.get_or_init(|| Arc::new(default_authority()))
}

fn default_authority() -> CredentialAuthority {
    authority_from_config(Config::load())
}

/// Authority for a loaded config, or one with no durable storage if the
/// config or its storage backend could not be set up
fn authority_from_config(config: anyhow::Result<Config>) -> CredentialAuthority {
    match config.and_then(|config| config.build_authority()) {
        Ok(authority) => authority,
        Err(e) => {
            warn!(error = %e, "Could not set up credential storage, running without persistence");
            CredentialAuthority::new(UnavailableStorage)
        }
    }
}

pub fn get_credential() -> Option<String> {
    authority().get()
}

pub fn set_credential(value: Option<&str>) {
    authority().set(value);
}

pub fn clear_credential() {
    authority().clear();
}

pub fn is_authenticated() -> bool {
    authority().is_authenticated()
}

/// Register a change listener. Keep the `Arc` to deregister it later.
pub fn on_credential_change(listener: CredentialListener) {
    authority().add_listener(listener);
}

pub fn off_credential_change(listener: &CredentialListener) {
    authority().remove_listener(listener);
}

/// Pick up a credential from a response payload, returning the credential
/// now in effect.
pub fn apply_from_response(payload: &Value) -> Option<String> {
    authority().apply_from_response(payload)
}
