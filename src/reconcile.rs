//! Reconciliation of synced revenue against the POS's authoritative figures.
//!
//! Per business date the state machine is
//! `UNVERIFIED -> MATCHED | MISMATCHED -> (apply_correction) -> CORRECTED`,
//! persisted on the override row. Every audit appends to
//! `reconciliation_log` with both values and the delta *before* any state
//! change — a mismatch is never silently resolved. Corrections are an
//! explicit, separate action.
//!
//! The effective stored figure for a date is the override value when an
//! override row exists, otherwise the freshly computed aggregate; a
//! correction therefore converges the next audit to MATCHED.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::RevenueSummary;
use crate::business_date::BusinessDate;
use crate::db::{business_date_to_sql, decimal_from_sql, decimal_to_sql, time_from_sql};
use crate::error::SyncError;
use crate::model::{OverrideRecord, ReconcileStatus, ReferenceTotal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Matched,
    Mismatched,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Matched => "MATCHED",
            Verdict::Mismatched => "MISMATCHED",
        }
    }
}

/// Result of one audit of one business date.
#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    pub business_date: BusinessDate,
    pub verdict: Verdict,
    /// Freshly computed aggregate under the summary's policy.
    pub computed: Decimal,
    /// The figure currently served for this date (override if one exists).
    pub effective: Decimal,
    /// The POS's authoritative figure.
    pub reference: Decimal,
    /// Absolute difference between effective and reference.
    pub delta: Decimal,
    /// On a mismatch, the value a correction would apply.
    pub proposed_correction: Option<ReferenceTotal>,
}

/// One row of the persisted audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub business_date: BusinessDate,
    pub computed: Decimal,
    pub effective: Decimal,
    pub reference: Decimal,
    pub delta: Decimal,
    pub policy: String,
    pub verdict: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct Auditor {
    tolerance: Decimal,
}

impl Auditor {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }

    /// Reconciliation state of a date. `Unverified` when never audited.
    pub fn status(
        conn: &Connection,
        business_date: BusinessDate,
    ) -> Result<ReconcileStatus, SyncError> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM revenue_overrides WHERE business_date = ?1",
                params![business_date_to_sql(business_date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status
            .as_deref()
            .and_then(ReconcileStatus::parse)
            .unwrap_or(ReconcileStatus::Unverified))
    }

    pub fn load_override(
        conn: &Connection,
        business_date: BusinessDate,
    ) -> Result<Option<OverrideRecord>, SyncError> {
        conn.query_row(
            "SELECT revenue, check_count, status, note, updated_at
             FROM revenue_overrides WHERE business_date = ?1",
            params![business_date_to_sql(business_date)],
            |row| {
                Ok(OverrideRecord {
                    business_date,
                    revenue: decimal_from_sql(&row.get::<_, String>(0)?),
                    check_count: row.get(1)?,
                    status: ReconcileStatus::parse(&row.get::<_, String>(2)?)
                        .unwrap_or(ReconcileStatus::Unverified),
                    note: row.get(3)?,
                    updated_at: time_from_sql(row.get(4)?),
                })
            },
        )
        .optional()
        .map_err(SyncError::from)
    }

    /// Compare the date's effective stored figure against a reference total
    /// and record the outcome. The audit-trail row is written before any
    /// state change.
    pub fn audit(
        &self,
        conn: &Connection,
        computed: &RevenueSummary,
        reference: &ReferenceTotal,
    ) -> Result<AuditOutcome, SyncError> {
        let business_date = computed.business_date;
        let existing = Self::load_override(conn, business_date)?;
        let effective = existing
            .as_ref()
            .map(|o| o.revenue)
            .unwrap_or(computed.total);

        let delta = (effective - reference.total).abs();
        let verdict = if delta <= self.tolerance {
            Verdict::Matched
        } else {
            Verdict::Mismatched
        };

        // Audit trail first, then state.
        conn.execute(
            "INSERT INTO reconciliation_log
                 (id, business_date, computed, effective, reference, delta, policy, verdict)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                business_date_to_sql(business_date),
                decimal_to_sql(computed.total),
                decimal_to_sql(effective),
                decimal_to_sql(reference.total),
                decimal_to_sql(delta),
                computed.policy.as_str(),
                verdict.as_str(),
            ],
        )?;

        match verdict {
            Verdict::Matched => info!(
                business_date = %business_date,
                total = %effective,
                "reconciliation matched"
            ),
            Verdict::Mismatched => warn!(
                business_date = %business_date,
                effective = %effective,
                reference = %reference.total,
                delta = %delta,
                "reconciliation mismatch"
            ),
        }

        match existing {
            Some(_) => {
                conn.execute(
                    "UPDATE revenue_overrides
                     SET status = ?2, updated_at = datetime('now')
                     WHERE business_date = ?1",
                    params![business_date_to_sql(business_date), verdict.as_str()],
                )?;
            }
            None => {
                // First audit of this date creates its override row. A match
                // stores the (now verified) reference figure; a mismatch
                // stores the computed figure until a correction is applied.
                let (revenue, count) = match verdict {
                    Verdict::Matched => (
                        reference.total,
                        reference.check_count.unwrap_or(computed.check_count),
                    ),
                    Verdict::Mismatched => (computed.total, computed.check_count),
                };
                conn.execute(
                    "INSERT INTO revenue_overrides
                         (business_date, revenue, check_count, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        business_date_to_sql(business_date),
                        decimal_to_sql(revenue),
                        count,
                        verdict.as_str(),
                    ],
                )?;
            }
        }

        Ok(AuditOutcome {
            business_date,
            verdict,
            computed: computed.total,
            effective,
            reference: reference.total,
            delta,
            proposed_correction: match verdict {
                Verdict::Mismatched => Some(*reference),
                Verdict::Matched => None,
            },
        })
    }

    /// Overwrite the override record with exactly the reference figure and
    /// mark the date CORRECTED. Logged like an audit so the trail shows who
    /// moved the number and from what.
    pub fn apply_correction(
        &self,
        conn: &Connection,
        business_date: BusinessDate,
        reference: &ReferenceTotal,
        note: Option<&str>,
    ) -> Result<OverrideRecord, SyncError> {
        let previous = Self::load_override(conn, business_date)?;
        let previous_revenue = previous.map(|o| o.revenue).unwrap_or(Decimal::ZERO);

        conn.execute(
            "INSERT INTO reconciliation_log
                 (id, business_date, computed, effective, reference, delta, policy, verdict)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'correction', 'CORRECTED')",
            params![
                Uuid::new_v4().to_string(),
                business_date_to_sql(business_date),
                decimal_to_sql(previous_revenue),
                decimal_to_sql(previous_revenue),
                decimal_to_sql(reference.total),
                decimal_to_sql((previous_revenue - reference.total).abs()),
            ],
        )?;

        conn.execute(
            "INSERT INTO revenue_overrides (business_date, revenue, check_count, status, note)
             VALUES (?1, ?2, ?3, 'CORRECTED', ?4)
             ON CONFLICT(business_date) DO UPDATE SET
                 revenue = excluded.revenue,
                 check_count = excluded.check_count,
                 status = 'CORRECTED',
                 note = excluded.note,
                 updated_at = datetime('now')",
            params![
                business_date_to_sql(business_date),
                decimal_to_sql(reference.total),
                reference.check_count.unwrap_or(0),
                note,
            ],
        )?;

        info!(
            business_date = %business_date,
            from = %previous_revenue,
            to = %reference.total,
            "override corrected to reference figure"
        );

        Self::load_override(conn, business_date)?.ok_or_else(|| {
            SyncError::Storage("override row missing immediately after correction".to_string())
        })
    }

    /// Full audit trail for a date, oldest first.
    pub fn audit_trail(
        conn: &Connection,
        business_date: BusinessDate,
    ) -> Result<Vec<AuditLogEntry>, SyncError> {
        let mut stmt = conn.prepare(
            "SELECT id, computed, effective, reference, delta, policy, verdict, created_at
             FROM reconciliation_log
             WHERE business_date = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![business_date_to_sql(business_date)], |row| {
            Ok(AuditLogEntry {
                id: row.get(0)?,
                business_date,
                computed: decimal_from_sql(&row.get::<_, String>(1)?),
                effective: decimal_from_sql(&row.get::<_, String>(2)?),
                reference: decimal_from_sql(&row.get::<_, String>(3)?),
                delta: decimal_from_sql(&row.get::<_, String>(4)?),
                policy: row.get(5)?,
                verdict: row.get(6)?,
                created_at: time_from_sql(row.get(7)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(SyncError::from)
    }
}
