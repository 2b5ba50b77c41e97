//! Short-lived streaming credentials.
//!
//! The backend issues a single-use token with a validity window of
//! minutes. A fresh token is fetched per session and never cached; a
//! reconnect attempt past the validity window must fail authentication
//! rather than dial with a stale token.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::error::SessionError;

/// Safety margin subtracted from the validity window, covering clock skew
/// and the dial itself.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    /// Validity window in seconds.
    expires_in: u64,
}

/// A server-issued streaming token with its validity window.
#[derive(Debug, Clone)]
pub struct StreamCredential {
    token: String,
    fetched_at: Instant,
    ttl: Duration,
}

impl StreamCredential {
    pub fn new(token: String, ttl: Duration) -> Self {
        Self {
            token,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the validity window (minus a safety margin) has elapsed.
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() + EXPIRY_MARGIN >= self.ttl
    }
}

/// Fetch a fresh streaming credential from the token endpoint.
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<StreamCredential, SessionError> {
    let response = client
        .post(url)
        .send()
        .await
        .map_err(|e| SessionError::NetworkUnavailable(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SessionError::AuthenticationFailed(format!(
            "token endpoint returned {status}"
        )));
    }
    if !status.is_success() {
        return Err(SessionError::ServiceUnavailable(format!(
            "token endpoint returned {status}"
        )));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| SessionError::ServiceUnavailable(format!("bad token response: {e}")))?;

    debug!(expires_in = body.expires_in, "Fetched streaming credential");
    Ok(StreamCredential::new(
        body.token,
        Duration::from_secs(body.expires_in),
    ))
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
