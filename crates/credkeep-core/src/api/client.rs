//! API client that keeps the credential authority in the loop.
//!
//! Every request carries the current credential as a bearer token. Every
//! JSON response is handed to `CredentialAuthority::apply_from_response`
//! before it reaches the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ApiError;
use crate::auth::CredentialAuthority;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client bound to a base URL and a credential authority.
/// Clone is cheap - reqwest::Client and the authority are both shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    authority: Arc<CredentialAuthority>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, authority: Arc<CredentialAuthority>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            authority,
        })
    }

    pub fn authority(&self) -> &Arc<CredentialAuthority> {
        &self.authority
    }

    /// Absolute URL for `path`. Paths that are already absolute URLs are
    /// used as-is.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.authority.get() {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Credential is not a valid header value")?,
            );
        }
        Ok(headers)
    }

    /// GET `path` and return the JSON body.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None::<&()>).await
    }

    /// POST a JSON body to `path` and return the JSON response. Login
    /// endpoints go through here; the issued token is picked up from the
    /// response.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// GET `path` and deserialize the body into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.get(path).await?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Value> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            let status = response.status();
            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .with_context(|| format!("Failed to read response body from {}", url))?;
                return Ok(self.absorb_body(&text));
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited.into());
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let error = ApiError::from_status(status, &body);
            self.handle_error(&error);
            return Err(error.into());
        }
    }

    /// Parse a success body and let the authority pick up any credential in
    /// it. Empty or non-JSON bodies become `Value::Null`.
    fn absorb_body(&self, text: &str) -> Value {
        if text.trim().is_empty() {
            return Value::Null;
        }
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Response body is not JSON");
                return Value::Null;
            }
        };
        self.authority.apply_from_response(&value);
        value
    }

    fn handle_error(&self, error: &ApiError) {
        if error.invalidates_credential() && self.authority.is_authenticated() {
            info!("Server rejected credential, clearing session");
            self.authority.clear();
        }
    }
}
