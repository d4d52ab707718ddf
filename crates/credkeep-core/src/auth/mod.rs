//! Session credential ownership.
//!
//! This module provides:
//! - `CredentialAuthority`: the single owner of the current credential,
//!   written through to a `CredentialStorage` backend
//! - `CredentialListener`: change callbacks, registered by `Arc` identity
//!
//! The authority never reports storage failures to callers. A backend that
//! cannot be read or written leaves it running in memory only.

pub mod authority;
pub mod listeners;

pub use authority::{listener, CredentialAuthority};
pub use listeners::CredentialListener;
