//! Bounded HTTP request with cancellation composition.
//!
//! Every adapter funnels its wire call through [`fetch`], which races the
//! request against a local timeout and the caller's cancellation token.
//! Dropping the race releases the timer and detaches from the caller's
//! token; the request future is aborted by reqwest on drop.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Fetch timeout after {0}ms")]
    Timeout(u128),

    #[error("Request cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// A JSON POST to a provider endpoint.
#[derive(Debug)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

/// Perform the request, honoring the timeout and the caller's cancellation.
///
/// A timeout aborts with the fixed `"Fetch timeout after <ms>ms"` text; a
/// caller abort surfaces as [`FetchError::Cancelled`]. Non-2xx statuses are
/// returned as `Ok` — status triage belongs to the adapter.
pub async fn fetch(
    client: &reqwest::Client,
    request: FetchRequest,
) -> Result<reqwest::Response, FetchError> {
    let mut builder = client.post(&request.url).json(&request.body);
    for (name, value) in &request.headers {
        builder = builder.header(*name, value);
    }

    let send = builder.send();

    match request.timeout {
        Some(timeout) => {
            tokio::select! {
                _ = request.cancel.cancelled() => Err(FetchError::Cancelled),
                _ = tokio::time::sleep(timeout) => Err(FetchError::Timeout(timeout.as_millis())),
                result = send => Ok(result?),
            }
        }
        None => {
            tokio::select! {
                _ = request.cancel.cancelled() => Err(FetchError::Cancelled),
                result = send => Ok(result?),
            }
        }
    }
}
