//! Relational entity model for synced POS data.
//!
//! Raw payloads are validated into these types at the normalizer boundary so
//! everything downstream works with typed entities rather than unchecked
//! JSON. Monetary fields are fixed-point decimals; the guid on each entity is
//! the POS-issued globally unique id and doubles as the idempotency key for
//! writes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::business_date::BusinessDate;

/// One POS order. Owns zero-or-more checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub guid: String,
    pub business_date: BusinessDate,
    pub location_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Payment lifecycle of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Open,
    Paid,
    Closed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Open => "OPEN",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Some(PaymentStatus::Open),
            "PAID" => Some(PaymentStatus::Paid),
            "CLOSED" => Some(PaymentStatus::Closed),
            _ => None,
        }
    }
}

/// A guest bill within an order; the unit of revenue measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub guid: String,
    pub order_guid: String,
    /// Gross total including tax, after discounts.
    pub total: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tip: Decimal,
    pub discount: Decimal,
    /// Void/delete status is authoritative for revenue math regardless of
    /// the stored amounts.
    pub voided: bool,
    pub deleted: bool,
    pub payment_status: PaymentStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// A line item on a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub guid: String,
    pub check_guid: String,
    pub item_guid: Option<String>,
    pub name: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub voided: bool,
}

/// A tender applied to a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub guid: String,
    pub check_guid: String,
    pub amount: Decimal,
    pub tip: Decimal,
    pub method: Option<String>,
    pub voided: bool,
    pub void_date: Option<DateTime<Utc>>,
}

/// One fully normalized order with its nested entities, ready to write.
#[derive(Debug, Clone)]
pub struct NormalizedOrder {
    pub order: Order,
    pub checks: Vec<NormalizedCheck>,
}

#[derive(Debug, Clone)]
pub struct NormalizedCheck {
    pub check: Check,
    pub selections: Vec<Selection>,
    pub payments: Vec<Payment>,
}

/// Reconciliation state of a business date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileStatus {
    Unverified,
    Matched,
    Mismatched,
    Corrected,
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Unverified => "UNVERIFIED",
            ReconcileStatus::Matched => "MATCHED",
            ReconcileStatus::Mismatched => "MISMATCHED",
            ReconcileStatus::Corrected => "CORRECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNVERIFIED" => Some(ReconcileStatus::Unverified),
            "MATCHED" => Some(ReconcileStatus::Matched),
            "MISMATCHED" => Some(ReconcileStatus::Mismatched),
            "CORRECTED" => Some(ReconcileStatus::Corrected),
            _ => None,
        }
    }
}

/// Ground-truth record for one business date: the trusted reference revenue
/// figure the reporting layer serves. Created once per date and mutated only
/// through the reconciliation/correction workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub business_date: BusinessDate,
    pub revenue: Decimal,
    pub check_count: i64,
    pub status: ReconcileStatus,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The POS's own authoritative per-day figure, fetched fresh from the
/// reporting endpoint or entered manually.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReferenceTotal {
    pub business_date: BusinessDate,
    pub total: Decimal,
    pub check_count: Option<i64>,
}
