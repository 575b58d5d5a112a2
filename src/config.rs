//! Engine configuration.
//!
//! Every component receives what it needs from one `SyncConfig` constructed
//! by the embedding application, instead of module-level clients or scattered
//! literals. Credential loading (env, keychain, .env) is the embedder's
//! concern.

use rust_decimal::Decimal;
use std::time::Duration;

/// Default timeout for POS API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Hours after UTC midnight at which the POS trading day starts.
const DEFAULT_DAY_BOUNDARY_HOUR: u32 = 4;

/// Configuration for one sync/reconciliation engine instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the POS provider API, normalized (no trailing slash).
    pub base_url: String,
    /// OAuth-style client credential pair for the identity endpoint.
    pub client_id: String,
    pub client_secret: String,
    /// POS location (restaurant) this engine syncs.
    pub location_id: String,
    /// Hours after UTC midnight at which the business day starts.
    pub day_boundary_hour: u32,
    /// Orders requested per page from the bulk listing endpoint.
    pub page_size: u32,
    /// Pause between page requests, to respect provider rate limits.
    pub page_delay: Duration,
    /// Retry attempts for transient network/5xx failures per request.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Reconciliation tolerance: absolute difference at or under this
    /// is considered a match.
    pub tolerance: Decimal,
}

impl SyncConfig {
    pub fn new(
        base_url: &str,
        client_id: &str,
        client_secret: &str,
        location_id: &str,
    ) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            location_id: location_id.to_string(),
            day_boundary_hour: DEFAULT_DAY_BOUNDARY_HOUR,
            page_size: 100,
            page_delay: Duration::from_millis(250),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            request_timeout: DEFAULT_TIMEOUT,
            tolerance: Decimal::new(1, 2), // $0.01
        }
    }
}

/// Normalise the POS API base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}
