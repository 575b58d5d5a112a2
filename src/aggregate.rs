//! Revenue aggregation by business date.
//!
//! Checks are selected through their parent order's business_date column,
//! never by slicing timestamps into UTC calendar days. Totals are summed as
//! decimals in Rust so the result is exact to the cent.
//!
//! Two legitimate exclusion policies exist side by side and yield different
//! totals; every summary is tagged with the policy that produced it so
//! numbers computed under different policies are never compared by accident.

use chrono::Timelike;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::business_date::BusinessDate;
use crate::db::{business_date_to_sql, decimal_from_sql, time_from_sql};
use crate::error::SyncError;

/// Which checks count toward revenue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExclusionPolicy {
    /// Exclude voided checks only. The default reporting policy.
    ExcludeVoided,
    /// Exclude voided and deleted checks, and any check never paid.
    /// Required by consumers that reconcile against settled payments.
    PaidOnly,
}

impl ExclusionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionPolicy::ExcludeVoided => "exclude_voided",
            ExclusionPolicy::PaidOnly => "paid_only",
        }
    }

    fn sql_predicate(&self) -> &'static str {
        match self {
            ExclusionPolicy::ExcludeVoided => "c.voided = 0",
            ExclusionPolicy::PaidOnly => {
                "c.voided = 0 AND c.deleted = 0 AND c.paid_at IS NOT NULL"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    /// UTC hour of the check's closed (or opened) instant.
    pub hour: u32,
    pub total: Decimal,
    pub check_count: i64,
}

/// Revenue for one business date, tagged with the policy that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenueSummary {
    pub business_date: BusinessDate,
    pub policy: ExclusionPolicy,
    pub total: Decimal,
    pub check_count: i64,
    pub hourly: Vec<HourlyBucket>,
}

/// Compute revenue for one business date under an explicit policy.
pub fn revenue_for_date(
    conn: &Connection,
    business_date: BusinessDate,
    policy: ExclusionPolicy,
) -> Result<RevenueSummary, SyncError> {
    let sql = format!(
        "SELECT c.total, c.closed_at, c.opened_at
         FROM checks c
         JOIN orders o ON o.guid = c.order_guid
         WHERE o.business_date = ?1 AND {}",
        policy.sql_predicate()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![business_date_to_sql(business_date)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut total = Decimal::ZERO;
    let mut check_count = 0i64;
    // 24 fixed buckets; empty ones are dropped at the end.
    let mut hourly = [(Decimal::ZERO, 0i64); 24];

    for row in rows {
        let (amount, closed_at, opened_at) = row?;
        let amount = decimal_from_sql(&amount);
        total += amount;
        check_count += 1;

        if let Some(instant) = time_from_sql(closed_at).or_else(|| time_from_sql(opened_at)) {
            let hour = instant.hour() as usize;
            hourly[hour].0 += amount;
            hourly[hour].1 += 1;
        }
    }

    let hourly = hourly
        .iter()
        .enumerate()
        .filter(|(_, (_, count))| *count > 0)
        .map(|(hour, (total, count))| HourlyBucket {
            hour: hour as u32,
            total: *total,
            check_count: *count,
        })
        .collect();

    Ok(RevenueSummary {
        business_date,
        policy,
        total,
        check_count,
        hourly,
    })
}

/// Per-day summaries for an inclusive business-date range.
pub fn revenue_for_range(
    conn: &Connection,
    start: BusinessDate,
    end: BusinessDate,
    policy: ExclusionPolicy,
) -> Result<Vec<RevenueSummary>, SyncError> {
    let mut out = Vec::new();
    let mut date = start;
    while date <= end {
        out.push(revenue_for_date(conn, date, policy)?);
        date = date.succ();
    }
    Ok(out)
}
