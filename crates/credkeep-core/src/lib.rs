//! Core library for credkeep.
//!
//! This crate owns the client-side session credential for an admin
//! dashboard:
//! - `auth`: the `CredentialAuthority` holding the current credential and
//!   notifying listeners of changes
//! - `extract`: locating a credential inside arbitrary JSON responses
//! - `storage`: durable backends the authority writes through to
//! - `facade`: the process-wide authority and free-function accessors
//! - `api`: a REST client that sends the credential and absorbs new ones
//! - `config`: backend selection and paths

pub mod api;
pub mod auth;
pub mod config;
pub mod extract;
pub mod facade;
pub mod storage;

pub use auth::{listener, CredentialAuthority, CredentialListener};
pub use config::{Config, StorageBackend};
pub use extract::extract_credential;
pub use storage::{CredentialStorage, StorageError};
