//! revsync — POS order/payment sync and revenue reconciliation engine.
//!
//! Ingests orders, checks, selections, and payments from a POS provider's
//! paginated HTTP API into SQLite, keyed by the provider's guids so repeated
//! runs never duplicate rows, buckets everything by the provider's trading
//! day (offset from UTC midnight by a boundary hour), and reconciles the
//! computed revenue against the provider's own per-day figures with an
//! explicit correction workflow.
//!
//! The embedding application owns configuration loading, scheduling, and any
//! HTTP/CLI surface; this crate is the engine underneath.

pub mod aggregate;
pub mod auth;
pub mod business_date;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pass;
pub mod reconcile;
pub mod store;

pub use aggregate::{ExclusionPolicy, RevenueSummary};
pub use business_date::BusinessDate;
pub use client::{FetchWindow, OrderSource, PosClient};
pub use config::SyncConfig;
pub use db::DbState;
pub use error::SyncError;
pub use model::{OverrideRecord, ReconcileStatus, ReferenceTotal};
pub use pass::{run_sync_pass, PassSummary};
pub use reconcile::{AuditOutcome, Auditor, Verdict};
