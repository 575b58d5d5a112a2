//! Normalization of raw POS order payloads into typed entities.
//!
//! This is the only place loosely-typed JSON is touched and the only place
//! minor-unit money becomes a decimal. The POS sends every monetary field as
//! integer cents; [`from_minor_units`] is the single conversion rule, so an
//! already-converted value can never be divided a second time downstream.
//!
//! Records missing their guid are skipped with a warning and counted — a bad
//! record never aborts a pass.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::business_date::BusinessDate;
use crate::model::{
    Check, NormalizedCheck, NormalizedOrder, Order, Payment, PaymentStatus, ReferenceTotal,
    Selection,
};

/// The one cents-to-decimal conversion rule. 2125 minor units become 21.25.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Per-pass normalization counters, reported in the pass summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct NormalizationStats {
    pub orders: usize,
    pub checks: usize,
    pub selections: usize,
    pub payments: usize,
    /// Records dropped for a missing guid or unusable business date.
    pub skipped: usize,
}

/// Normalize one raw order payload into an [`Order`] with its nested checks,
/// selections, and payments. Returns `None` (after counting and logging) when
/// the order itself is unusable.
pub fn normalize_order(
    raw: &Value,
    day_boundary_hour: u32,
    stats: &mut NormalizationStats,
) -> Option<NormalizedOrder> {
    let Some(guid) = entity_guid(raw) else {
        warn!("order payload missing guid, skipping");
        stats.skipped += 1;
        return None;
    };

    let created_at = time_field(raw, "createdDate");
    let modified_at = time_field(raw, "modifiedDate");
    let opened_at = time_field(raw, "openedDate");

    // Business-date bucket: take the POS's own value when present, otherwise
    // derive it from the opened instant through the resolver. Never a raw
    // UTC calendar day.
    let business_date = u64_field(raw, "businessDate")
        .and_then(|v| u32::try_from(v).ok())
        .and_then(BusinessDate::from_compact)
        .or_else(|| {
            opened_at
                .or(created_at)
                .map(|t| BusinessDate::for_instant(t, day_boundary_hour))
        });
    let Some(business_date) = business_date else {
        warn!(order = %guid, "order has neither businessDate nor timestamps, skipping");
        stats.skipped += 1;
        return None;
    };

    let order = Order {
        guid: guid.clone(),
        business_date,
        location_id: str_field(raw, "locationGuid").or_else(|| str_field(raw, "restaurantGuid")),
        created_at,
        modified_at,
    };
    stats.orders += 1;

    let mut checks = Vec::new();
    for raw_check in array_field(raw, "checks") {
        if let Some(check) = normalize_check(raw_check, &guid, stats) {
            checks.push(check);
        }
    }

    Some(NormalizedOrder { order, checks })
}

fn normalize_check(
    raw: &Value,
    order_guid: &str,
    stats: &mut NormalizationStats,
) -> Option<NormalizedCheck> {
    let Some(guid) = entity_guid(raw) else {
        warn!(order = %order_guid, "check payload missing guid, skipping");
        stats.skipped += 1;
        return None;
    };

    let closed_at = time_field(raw, "closedDate");
    let paid_at = time_field(raw, "paidDate");

    // The POS usually sends paymentStatus; derive it from the lifecycle
    // timestamps when it is absent.
    let payment_status = str_field(raw, "paymentStatus")
        .and_then(|s| PaymentStatus::parse(&s))
        .unwrap_or(if paid_at.is_some() {
            PaymentStatus::Paid
        } else if closed_at.is_some() {
            PaymentStatus::Closed
        } else {
            PaymentStatus::Open
        });

    let check = Check {
        guid: guid.clone(),
        order_guid: order_guid.to_string(),
        total: money_field(raw, "totalAmount"),
        subtotal: money_field(raw, "amount"),
        tax: money_field(raw, "taxAmount"),
        tip: money_field(raw, "tipAmount"),
        discount: money_field(raw, "discountAmount"),
        voided: bool_field(raw, "voided"),
        deleted: bool_field(raw, "deleted"),
        payment_status,
        created_at: time_field(raw, "createdDate"),
        opened_at: time_field(raw, "openedDate"),
        closed_at,
        paid_at,
    };
    stats.checks += 1;

    let mut selections = Vec::new();
    for raw_sel in array_field(raw, "selections") {
        if let Some(sel) = normalize_selection(raw_sel, &guid, stats) {
            selections.push(sel);
        }
    }

    let mut payments = Vec::new();
    for raw_pay in array_field(raw, "payments") {
        if let Some(pay) = normalize_payment(raw_pay, &guid, stats) {
            payments.push(pay);
        }
    }

    Some(NormalizedCheck {
        check,
        selections,
        payments,
    })
}

fn normalize_selection(
    raw: &Value,
    check_guid: &str,
    stats: &mut NormalizationStats,
) -> Option<Selection> {
    let Some(guid) = entity_guid(raw) else {
        warn!(check = %check_guid, "selection payload missing guid, skipping");
        stats.skipped += 1;
        return None;
    };

    let quantity = raw
        .get("quantity")
        .and_then(Value::as_f64)
        .and_then(Decimal::from_f64)
        .unwrap_or(Decimal::ONE);

    stats.selections += 1;
    Some(Selection {
        guid,
        check_guid: check_guid.to_string(),
        item_guid: str_field(raw, "itemGuid")
            .or_else(|| raw.get("item").and_then(entity_guid)),
        name: str_field(raw, "displayName"),
        quantity,
        unit_price: money_field(raw, "price"),
        tax: money_field(raw, "taxAmount"),
        discount: money_field(raw, "discountAmount"),
        voided: bool_field(raw, "voided"),
    })
}

fn normalize_payment(
    raw: &Value,
    check_guid: &str,
    stats: &mut NormalizationStats,
) -> Option<Payment> {
    let Some(guid) = entity_guid(raw) else {
        warn!(check = %check_guid, "payment payload missing guid, skipping");
        stats.skipped += 1;
        return None;
    };

    let void_info = raw.get("voidInfo");
    let voided = bool_field(raw, "voided") || void_info.map_or(false, |v| !v.is_null());

    stats.payments += 1;
    Some(Payment {
        guid,
        check_guid: check_guid.to_string(),
        amount: money_field(raw, "amount"),
        tip: money_field(raw, "tipAmount"),
        method: str_field(raw, "type"),
        voided,
        void_date: void_info.and_then(|v| time_field(v, "voidDate")),
    })
}

/// Parse the POS daily-summary payload into a reference total for the
/// auditor. Revenue arrives in minor units like everything else.
pub fn reference_from_summary(business_date: BusinessDate, raw: &Value) -> Option<ReferenceTotal> {
    let minor = i64_field(raw, "totalRevenue").or_else(|| i64_field(raw, "netSales"))?;
    Some(ReferenceTotal {
        business_date,
        total: from_minor_units(minor),
        check_count: i64_field(raw, "checkCount"),
    })
}

// ---------------------------------------------------------------------------
// Field extraction helpers
// ---------------------------------------------------------------------------

fn entity_guid(v: &Value) -> Option<String> {
    str_field(v, "guid")
        .or_else(|| str_field(v, "id"))
        .filter(|s| !s.trim().is_empty())
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(String::from)
}

fn i64_field(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn u64_field(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64)
}

fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn array_field<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn time_field(v: &Value, key: &str) -> Option<DateTime<Utc>> {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Monetary field in minor units. Absent (or null) means zero; a value that
/// is present but not an integer is a provider regression worth a warning,
/// since silently zeroing it deflates revenue until reconciliation notices.
fn money_field(v: &Value, key: &str) -> Decimal {
    match v.get(key) {
        None | Some(Value::Null) => Decimal::ZERO,
        Some(raw) => match raw.as_i64() {
            Some(minor) => from_minor_units(minor),
            None => {
                warn!(key, value = %raw, "monetary field is not integer minor units, treating as zero");
                Decimal::ZERO
            }
        },
    }
}
