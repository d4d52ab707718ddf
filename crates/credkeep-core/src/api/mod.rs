//! Authenticated REST client glue.
//!
//! This module provides the `ApiClient`, which attaches the current session
//! credential to outgoing requests and feeds every JSON response back
//! through the credential authority, so tokens issued or rotated by the
//! server are picked up without callers handling them.
//!
//! A 401 response clears the credential.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
