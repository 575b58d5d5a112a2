//! POS provider API client: paginated order fetching and daily reference
//! totals.
//!
//! The bulk-order listing is walked page by page with a fixed exhaustion
//! convention: keep requesting while a page comes back full, stop on the
//! first short or empty page. Transient failures (connect/timeout/5xx) retry
//! with bounded attempts and doubling backoff; a 401 triggers exactly one
//! re-login; other 4xx responses are permanent for the window. Fetching has
//! no side effects.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{Authenticator, BearerToken};
use crate::business_date::BusinessDate;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::ReferenceTotal;
use crate::normalize;

/// Hard cap on pages walked for one window, against a server that never
/// returns a short page.
const MAX_PAGES: u32 = 1_000;

/// Backoff ceiling per attempt.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// The instant range covering one trading day, produced by the business-date
/// resolver. Carrying the date alongside the instants keeps the two
/// representations from drifting apart.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub business_date: BusinessDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn for_date(business_date: BusinessDate, day_boundary_hour: u32) -> Self {
        let (start, end) = business_date.window(day_boundary_hour);
        Self {
            business_date,
            start,
            end,
        }
    }
}

/// Source of raw order pages for a window. `PosClient` is the production
/// implementation; tests substitute in-memory fakes.
#[allow(async_fn_in_trait)]
pub trait OrderSource {
    async fn fetch_page(
        &mut self,
        window: &FetchWindow,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, SyncError>;
}

/// True when a returned page signals exhaustion under the short-page
/// convention (the single convention used everywhere).
pub fn is_last_page(page_len: usize, page_size: u32) -> bool {
    page_len < page_size as usize
}

/// Walk the pages of one window in order, handing each non-empty page to
/// `on_page`, pausing `page_delay` between requests. Returns the number of
/// pages requested. A failed request aborts the walk but everything already
/// handed to `on_page` stands.
pub async fn walk_pages<S, F>(
    source: &mut S,
    window: &FetchWindow,
    page_size: u32,
    page_delay: Duration,
    mut on_page: F,
) -> Result<u32, SyncError>
where
    S: OrderSource,
    F: FnMut(u32, Vec<Value>) -> Result<(), SyncError>,
{
    let mut page = 1u32;
    loop {
        if page > MAX_PAGES {
            return Err(SyncError::fetch(
                format!("orders page {page}"),
                format!("page cap of {MAX_PAGES} exceeded without a short page"),
            ));
        }

        let items = source.fetch_page(window, page, page_size).await?;
        let len = items.len();
        debug!(business_date = %window.business_date, page, count = len, "fetched order page");

        if len > 0 {
            on_page(page, items)?;
        }
        if is_last_page(len, page_size) {
            return Ok(page);
        }

        page += 1;
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }
}

/// Assemble the complete raw order set for one window.
pub async fn fetch_all_orders<S: OrderSource>(
    source: &mut S,
    window: &FetchWindow,
    page_size: u32,
    page_delay: Duration,
) -> Result<Vec<Value>, SyncError> {
    let mut all = Vec::new();
    walk_pages(source, window, page_size, page_delay, |_page, mut items| {
        all.append(&mut items);
        Ok(())
    })
    .await?;
    Ok(all)
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct PosClient {
    http: Client,
    auth: Authenticator,
    config: SyncConfig,
    token: Option<BearerToken>,
}

impl PosClient {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::fetch("client setup", format!("failed to build HTTP client: {e}")))?;
        let auth = Authenticator::new(http.clone(), &config);
        Ok(Self {
            http,
            auth,
            config,
            token: None,
        })
    }

    async fn bearer(&mut self) -> Result<String, SyncError> {
        if let Some(tok) = &self.token {
            return Ok(tok.access_token.clone());
        }
        let tok = self.auth.login().await?;
        let access = tok.access_token.clone();
        self.token = Some(tok);
        Ok(access)
    }

    /// Authenticated GET with the retry policy described in the module docs.
    /// The status-code decisions live in [`classify_status`] so the policy
    /// itself is testable without a server.
    async fn get_with_retry(
        &mut self,
        url: &str,
        query: &[(String, String)],
        what: &str,
    ) -> Result<Value, SyncError> {
        let mut reauthed = false;
        let mut attempt = 0u32;
        let mut delay = self.config.retry_base_delay;

        loop {
            let token = self.bearer().await?;
            let result = self
                .http
                .get(url)
                .query(query)
                .bearer_auth(token)
                .header("X-Location-Id", &self.config.location_id)
                .header("Accept", "application/json")
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await.unwrap_or_default();
                        if text.is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str(&text).map_err(|e| {
                            SyncError::fetch(what, format!("invalid JSON from POS API: {e}"))
                        });
                    }

                    match classify_status(status, attempt, self.config.max_retries, reauthed) {
                        StatusAction::ReAuth => {
                            warn!(what, "401 from POS API, re-authenticating once");
                            self.token = None;
                            reauthed = true;
                        }
                        StatusAction::AuthFailure => {
                            return Err(SyncError::Auth {
                                status: status.as_u16(),
                                detail: "bearer token still rejected after re-authentication"
                                    .to_string(),
                            });
                        }
                        StatusAction::Retry => {
                            attempt += 1;
                            warn!(
                                what,
                                status = status.as_u16(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient POS API error, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            delay = next_delay(delay);
                        }
                        StatusAction::Permanent => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(SyncError::fetch(what, status_detail(status, &body)));
                        }
                    }
                }
                Err(e) if is_transient(&e) && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "network error talking to POS API, backing off: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay);
                }
                Err(e) => {
                    return Err(SyncError::fetch(
                        what,
                        friendly_error(&self.config.base_url, &e),
                    ));
                }
            }
        }
    }

    /// Fetch the POS's own authoritative figure for one trading day, used as
    /// the fresh reference by the reconciliation auditor.
    pub async fn fetch_daily_summary(
        &mut self,
        business_date: BusinessDate,
    ) -> Result<ReferenceTotal, SyncError> {
        let url = format!("{}/reports/v1/dailySummary", self.config.base_url);
        let query = vec![(
            "businessDate".to_string(),
            business_date.compact().to_string(),
        )];
        let body = self.get_with_retry(&url, &query, "daily summary").await?;
        normalize::reference_from_summary(business_date, &body).ok_or_else(|| {
            SyncError::fetch("daily summary", "response carried no revenue figure")
        })
    }
}

impl OrderSource for PosClient {
    async fn fetch_page(
        &mut self,
        window: &FetchWindow,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, SyncError> {
        let url = format!("{}/orders/v2/ordersBulk", self.config.base_url);
        let query = vec![
            (
                "startDate".to_string(),
                window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (
                "endDate".to_string(),
                window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("page".to_string(), page.to_string()),
            ("pageSize".to_string(), page_size.to_string()),
        ];
        let what = format!("orders page {page}");
        let body = self.get_with_retry(&url, &query, &what).await?;
        match body {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            _ => Err(SyncError::fetch(
                what,
                "expected an array of orders from the bulk listing",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// What to do about a non-success HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusAction {
    /// Transient 5xx with attempts left: back off and retry.
    Retry,
    /// First 401: drop the token and log in again.
    ReAuth,
    /// 401 after the single re-login: credentials are bad, fatal.
    AuthFailure,
    /// Anything else (other 4xx, or 5xx with retries exhausted): fail the
    /// request without retrying.
    Permanent,
}

/// Decide how to handle `status` given how many retries have been spent and
/// whether the single re-authentication has already been used.
fn classify_status(
    status: StatusCode,
    attempt: u32,
    max_retries: u32,
    reauthed: bool,
) -> StatusAction {
    if status == StatusCode::UNAUTHORIZED {
        return if reauthed {
            StatusAction::AuthFailure
        } else {
            StatusAction::ReAuth
        };
    }
    if status.is_server_error() && attempt < max_retries {
        return StatusAction::Retry;
    }
    StatusAction::Permanent
}

/// Doubling backoff, capped at [`MAX_RETRY_DELAY`].
fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_RETRY_DELAY)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(base_url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("cannot reach POS API at {base_url}");
    }
    if err.is_timeout() {
        return format!("connection to {base_url} timed out");
    }
    format!("network error communicating with {base_url}: {err}")
}

/// Convert a non-success HTTP status (plus response body, if useful) into a
/// user-friendly message.
fn status_detail(status: StatusCode, body: &str) -> String {
    let base = match status.as_u16() {
        403 => "client not authorized for this location".to_string(),
        404 => "POS API endpoint not found".to_string(),
        429 => "rate limited by POS API".to_string(),
        s if s >= 500 => format!("POS API server error (HTTP {s})"),
        s => format!("unexpected POS API response (HTTP {s})"),
    };
    let trimmed = body.trim();
    if trimmed.is_empty() {
        base
    } else {
        format!("{base}: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> FetchWindow {
        let date = BusinessDate::new(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
        FetchWindow::for_date(date, 4)
    }

    /// Serves pre-built pages and records which pages were requested.
    struct FakeSource {
        pages: Vec<Vec<Value>>,
        requests: Vec<u32>,
    }

    impl FakeSource {
        fn with_order_count(total: usize, page_size: usize) -> Self {
            let orders: Vec<Value> = (0..total)
                .map(|i| serde_json::json!({ "guid": format!("order-{i}") }))
                .collect();
            let pages = orders.chunks(page_size).map(|c| c.to_vec()).collect();
            Self {
                pages,
                requests: Vec::new(),
            }
        }
    }

    impl OrderSource for FakeSource {
        async fn fetch_page(
            &mut self,
            _window: &FetchWindow,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<Value>, SyncError> {
            self.requests.push(page);
            Ok(self
                .pages
                .get((page - 1) as usize)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_short_final_page_stops_pagination() {
        let mut source = FakeSource::with_order_count(237, 100);
        let all = fetch_all_orders(&mut source, &window(), 100, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(all.len(), 237);
        assert_eq!(source.requests, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_probe() {
        let mut source = FakeSource::with_order_count(200, 100);
        let all = fetch_all_orders(&mut source, &window(), 100, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(all.len(), 200);
        // Pages 1 and 2 come back full, so a third request observes the
        // empty page that signals exhaustion.
        assert_eq!(source.requests, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_window_is_one_request() {
        let mut source = FakeSource::with_order_count(0, 100);
        let all = fetch_all_orders(&mut source, &window(), 100, Duration::ZERO)
            .await
            .unwrap();
        assert!(all.is_empty());
        assert_eq!(source.requests, vec![1]);
    }

    #[test]
    fn test_is_last_page_convention() {
        assert!(!is_last_page(100, 100));
        assert!(is_last_page(99, 100));
        assert!(is_last_page(0, 100));
    }

    #[test]
    fn test_5xx_retries_exactly_max_retries_then_fails() {
        let max_retries = 3;
        let mut attempt = 0;
        // Each Retry spends one attempt, mirroring the get_with_retry loop.
        while classify_status(StatusCode::SERVICE_UNAVAILABLE, attempt, max_retries, false)
            == StatusAction::Retry
        {
            attempt += 1;
        }
        assert_eq!(attempt, max_retries);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, attempt, max_retries, false),
            StatusAction::Permanent
        );
    }

    #[test]
    fn test_401_reauths_once_then_is_auth_failure() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, 0, 3, false),
            StatusAction::ReAuth
        );
        // The second 401 is terminal regardless of remaining retry budget.
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, 0, 3, true),
            StatusAction::AuthFailure
        );
    }

    #[test]
    fn test_other_4xx_is_permanent_with_full_retry_budget() {
        for status in [
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert_eq!(
                classify_status(status, 0, 3, false),
                StatusAction::Permanent
            );
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let mut delay = Duration::from_millis(500);
        delay = next_delay(delay);
        assert_eq!(delay, Duration::from_millis(1_000));
        delay = next_delay(delay);
        assert_eq!(delay, Duration::from_millis(2_000));

        assert_eq!(next_delay(MAX_RETRY_DELAY), MAX_RETRY_DELAY);
        assert_eq!(next_delay(Duration::from_secs(20)), MAX_RETRY_DELAY);
    }
}
