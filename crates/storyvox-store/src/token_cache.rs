//! OAuth access-token lease for Firestore requests.
//!
//! A lease is renewed a minute before it expires. The lock is held across
//! renewal, so concurrent requests wait for one fetch instead of racing.
//! When renewal fails, a lease that has not yet expired is still handed out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

const RENEW_BEFORE_EXPIRY: Duration = Duration::from_secs(60);

/// Assumed lifetime when the provider reports an expiry in the past.
const FALLBACK_LIFETIME: Duration = Duration::from_secs(50 * 60);

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    renew_at: Instant,
    expires_at: Instant,
}

impl Lease {
    fn new(token: String, lifetime: Duration, now: Instant) -> Self {
        let expires_at = now + lifetime;
        Self {
            token,
            renew_at: expires_at.checked_sub(RENEW_BEFORE_EXPIRY).unwrap_or(now),
            expires_at,
        }
    }

    fn fresh(&self, now: Instant) -> bool {
        now < self.renew_at
    }

    fn usable(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared access-token lease for every store backed by one client.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    lease: Mutex<Option<Lease>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            lease: Mutex::new(None),
        }
    }

    /// Drop the current lease; the next request fetches a new token.
    pub async fn invalidate(&self) {
        self.lease.lock().await.take();
    }

    pub async fn get_token(&self) -> StoreResult<String> {
        let mut lease = self.lease.lock().await;
        let now = Instant::now();
        if let Some(current) = lease.as_ref().filter(|l| l.fresh(now)) {
            return Ok(current.token.clone());
        }

        match self.provider.token(&[DATASTORE_SCOPE]).await {
            Ok(token) => {
                let remaining = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(FALLBACK_LIFETIME);
                let renewed = Lease::new(token.as_str().to_string(), remaining, now);
                debug!(lifetime_secs = remaining.as_secs(), "Renewed Firestore token lease");
                let value = renewed.token.clone();
                *lease = Some(renewed);
                Ok(value)
            }
            Err(e) => match lease.as_ref().filter(|l| l.usable(now)) {
                Some(current) => {
                    warn!(error = %e, "Token renewal failed, reusing unexpired lease");
                    Ok(current.token.clone())
                }
                None => Err(StoreError::auth_error(format!("no Firestore token: {}", e))),
            },
        }
    }
}
