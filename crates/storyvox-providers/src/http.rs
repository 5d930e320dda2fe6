//! Shared HTTP plumbing for provider clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use crate::error::{ProviderError, ProviderResult};

/// Client with a per-call timeout.
pub(crate) fn build_client(timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ProviderError::Network)
}

/// Attach a bearer token when one is configured.
pub(crate) fn with_bearer(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Return the response if successful, otherwise a classified error.
pub(crate) async fn ensure_success(provider: &'static str, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(provider, status.as_u16(), body))
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
