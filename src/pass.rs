//! One parameterized sync pass for one business date.
//!
//! Replaces the family of near-identical per-date sync scripts with a single
//! component configured by date and policy. Pages are fetched, normalized,
//! and written strictly in order; a write only happens once its whole page is
//! normalized, so cancelling between pages never leaves a partial page
//! behind, and re-running is safe because every write is an upsert.
//!
//! Distinct business dates own disjoint storage partitions and may run as
//! concurrent passes; the guid uniqueness constraint is the only shared
//! control.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{self, ExclusionPolicy, RevenueSummary};
use crate::business_date::BusinessDate;
use crate::client::{self, FetchWindow, OrderSource};
use crate::config::SyncConfig;
use crate::db::DbState;
use crate::error::SyncError;
use crate::normalize::{self, NormalizationStats};
use crate::store::{self, WriteStats};

/// Deterministic summary of one pass, produced whether the pass completed or
/// aborted on a fatal fetch/auth error.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub business_date: BusinessDate,
    pub pages_fetched: u32,
    pub orders_fetched: usize,
    pub normalization: NormalizationStats,
    pub writes: WriteStats,
    /// Aggregate for the date after this pass, under the requested policy.
    pub revenue: RevenueSummary,
    /// Set when the pass aborted early; pages written before the abort
    /// stand, and the aggregate still reflects everything stored.
    pub fatal: Option<String>,
}

/// Run one sync pass: fetch the date's window page by page, normalize and
/// upsert each page, then compute the date's aggregate under `policy`.
///
/// Only a broken storage layer is returned as `Err`; fetch/auth failures are
/// folded into the summary's `fatal` field because the rows already written
/// remain valid and idempotently re-syncable.
pub async fn run_sync_pass<S: OrderSource>(
    source: &mut S,
    db: &DbState,
    config: &SyncConfig,
    business_date: BusinessDate,
    policy: ExclusionPolicy,
) -> Result<PassSummary, SyncError> {
    let pass_id = Uuid::new_v4();
    let window = FetchWindow::for_date(business_date, config.day_boundary_hour);
    info!(
        %pass_id,
        %business_date,
        window_start = %window.start,
        window_end = %window.end,
        "starting sync pass"
    );

    let mut orders_fetched = 0usize;
    let mut pages_fetched = 0u32;
    let mut norm_stats = NormalizationStats::default();
    let mut writes = WriteStats::default();
    let mut page_error: Option<SyncError> = None;

    let walk = client::walk_pages(
        source,
        &window,
        config.page_size,
        config.page_delay,
        |page, raw_orders| {
            pages_fetched = page;
            orders_fetched += raw_orders.len();

            let mut normalized = Vec::with_capacity(raw_orders.len());
            for raw in &raw_orders {
                if let Some(order) =
                    normalize::normalize_order(raw, config.day_boundary_hour, &mut norm_stats)
                {
                    normalized.push(order);
                }
            }

            let conn = db
                .conn
                .lock()
                .map_err(|e| SyncError::Storage(format!("connection lock poisoned: {e}")))?;
            let page_writes = store::write_page(&conn, &normalized);
            writes.merge(&page_writes);
            Ok(())
        },
    )
    .await;

    match walk {
        Ok(pages) => pages_fetched = pages,
        Err(e) if e.is_pass_fatal() => {
            warn!(%pass_id, %business_date, "sync pass aborted: {e}");
            page_error = Some(e);
        }
        Err(e) => return Err(e),
    }

    let revenue = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| SyncError::Storage(format!("connection lock poisoned: {e}")))?;
        aggregate::revenue_for_date(&conn, business_date, policy)?
    };

    let summary = PassSummary {
        pass_id,
        business_date,
        pages_fetched,
        orders_fetched,
        normalization: norm_stats,
        writes,
        revenue,
        fatal: page_error.map(|e| e.to_string()),
    };

    info!(
        %pass_id,
        %business_date,
        pages = summary.pages_fetched,
        orders = summary.orders_fetched,
        checks_written = summary.writes.checks.written,
        rows_failed = summary.writes.total_failed(),
        skipped = summary.normalization.skipped,
        revenue = %summary.revenue.total,
        fatal = summary.fatal.as_deref().unwrap_or("none"),
        "sync pass finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn test_config() -> SyncConfig {
        let mut cfg = SyncConfig::new("http://localhost", "id", "secret", "loc-1");
        cfg.page_delay = Duration::ZERO;
        cfg
    }

    fn date() -> BusinessDate {
        BusinessDate::from_compact(20260115).unwrap()
    }

    /// Builds the scenario upstream: 237 orders split 100/100/37. The first
    /// 96 orders each carry one paid check at 2125 minor units ($21.25);
    /// the rest carry a voided check or no check at all.
    fn scenario_pages() -> Vec<Vec<Value>> {
        let orders: Vec<Value> = (0..237)
            .map(|i| {
                let checks = if i < 96 {
                    serde_json::json!([{
                        "guid": format!("check-{i}"),
                        "totalAmount": 2125,
                        "voided": false,
                        "paymentStatus": "PAID",
                        "paidDate": "2026-01-15T20:00:00.000Z",
                        "closedDate": "2026-01-15T20:00:00.000Z"
                    }])
                } else if i < 200 {
                    serde_json::json!([{
                        "guid": format!("check-{i}"),
                        "totalAmount": 9999,
                        "voided": true
                    }])
                } else {
                    serde_json::json!([])
                };
                serde_json::json!({
                    "guid": format!("order-{i}"),
                    "businessDate": 20260115,
                    "checks": checks
                })
            })
            .collect();
        orders.chunks(100).map(|c| c.to_vec()).collect()
    }

    struct FakeSource {
        pages: Vec<Vec<Value>>,
        fail_on_page: Option<u32>,
    }

    impl OrderSource for FakeSource {
        async fn fetch_page(
            &mut self,
            _window: &FetchWindow,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<Value>, SyncError> {
            if self.fail_on_page == Some(page) {
                return Err(SyncError::fetch(
                    format!("orders page {page}"),
                    "POS API server error (HTTP 503)",
                ));
            }
            Ok(self
                .pages
                .get((page - 1) as usize)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn row_counts(db: &DbState) -> (i64, i64) {
        let conn = db.conn.lock().unwrap();
        let orders: i64 = conn
            .query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))
            .unwrap();
        let checks: i64 = conn
            .query_row("SELECT COUNT(*) FROM checks", [], |r| r.get(0))
            .unwrap();
        (orders, checks)
    }

    #[tokio::test]
    async fn test_scenario_237_orders_three_pages() {
        let db = DbState::open_in_memory().unwrap();
        let mut source = FakeSource {
            pages: scenario_pages(),
            fail_on_page: None,
        };

        let summary = run_sync_pass(
            &mut source,
            &db,
            &test_config(),
            date(),
            ExclusionPolicy::ExcludeVoided,
        )
        .await
        .unwrap();

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.orders_fetched, 237);
        assert_eq!(summary.writes.orders.written, 237);
        assert!(summary.fatal.is_none());

        assert_eq!(summary.revenue.check_count, 96);
        assert_eq!(summary.revenue.total.to_string(), "2040.00");
    }

    #[tokio::test]
    async fn test_second_pass_over_unchanged_upstream_changes_nothing() {
        let db = DbState::open_in_memory().unwrap();
        let cfg = test_config();
        let mut source = FakeSource {
            pages: scenario_pages(),
            fail_on_page: None,
        };

        let first = run_sync_pass(&mut source, &db, &cfg, date(), ExclusionPolicy::ExcludeVoided)
            .await
            .unwrap();
        let counts_after_first = row_counts(&db);

        let second = run_sync_pass(&mut source, &db, &cfg, date(), ExclusionPolicy::ExcludeVoided)
            .await
            .unwrap();
        let counts_after_second = row_counts(&db);

        assert_eq!(counts_after_first, counts_after_second);
        assert_eq!(first.revenue.total, second.revenue.total);
        assert_eq!(second.writes.total_failed(), 0);
    }

    #[tokio::test]
    async fn test_updated_check_total_replaces_not_accumulates() {
        let db = DbState::open_in_memory().unwrap();
        let cfg = test_config();
        let order = |total: i64| {
            serde_json::json!({
                "guid": "order-1",
                "businessDate": 20260115,
                "checks": [{
                    "guid": "check-1",
                    "totalAmount": total,
                    "voided": false
                }]
            })
        };

        let mut source = FakeSource {
            pages: vec![vec![order(2125)]],
            fail_on_page: None,
        };
        run_sync_pass(&mut source, &db, &cfg, date(), ExclusionPolicy::ExcludeVoided)
            .await
            .unwrap();

        // Later pass sees the same check with an updated total.
        let mut source = FakeSource {
            pages: vec![vec![order(2500)]],
            fail_on_page: None,
        };
        let summary =
            run_sync_pass(&mut source, &db, &cfg, date(), ExclusionPolicy::ExcludeVoided)
                .await
                .unwrap();

        assert_eq!(row_counts(&db), (1, 1));
        assert_eq!(summary.revenue.total.to_string(), "25.00");
    }

    #[tokio::test]
    async fn test_page_failure_keeps_prior_pages_and_reports_fatal() {
        let db = DbState::open_in_memory().unwrap();
        let mut source = FakeSource {
            pages: scenario_pages(),
            fail_on_page: Some(2),
        };

        let summary = run_sync_pass(
            &mut source,
            &db,
            &test_config(),
            date(),
            ExclusionPolicy::ExcludeVoided,
        )
        .await
        .unwrap();

        assert!(summary.fatal.is_some());
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.writes.orders.written, 100);
        // Page 1 carried the first 96 paying checks plus 4 voided ones.
        assert_eq!(summary.revenue.check_count, 96);
        assert_eq!(row_counts(&db).0, 100);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped_not_fatal() {
        let db = DbState::open_in_memory().unwrap();
        let pages = vec![vec![
            serde_json::json!({ "businessDate": 20260115 }), // no guid
            serde_json::json!({
                "guid": "order-ok",
                "businessDate": 20260115,
                "checks": [{ "guid": "check-ok", "totalAmount": 1500 }]
            }),
        ]];
        let mut source = FakeSource {
            pages,
            fail_on_page: None,
        };

        let summary = run_sync_pass(
            &mut source,
            &db,
            &test_config(),
            date(),
            ExclusionPolicy::ExcludeVoided,
        )
        .await
        .unwrap();

        assert!(summary.fatal.is_none());
        assert_eq!(summary.normalization.skipped, 1);
        assert_eq!(summary.writes.orders.written, 1);
        assert_eq!(summary.revenue.total.to_string(), "15.00");
    }
}
