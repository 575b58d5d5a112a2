//! SQLite storage layer for synced POS data.
//!
//! rusqlite with WAL mode, versioned migrations, and managed connection
//! state. Migration v1 creates the entity tables as they historically
//! existed — without uniqueness on the POS guid. Migration v2 is the
//! one-time bring-up step that makes idempotent upserts meaningful: it
//! de-duplicates each table (keeping the earliest row per guid) and then
//! adds the unique guid indexes the upserts rely on.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::business_date::BusinessDate;
use crate::error::SyncError;

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// In-memory database with the full schema. Used by tests and by
    /// embedders that keep no local file.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&conn)?;
        Ok(DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/revsync.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations.
pub fn init(data_dir: &Path) -> Result<DbState, SyncError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| SyncError::Storage(format!("failed to create data dir: {e}")))?;

    let db_path = data_dir.join("revsync.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path)?;
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, SyncError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub(crate) fn run_migrations(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: entity tables. Monetary columns are canonical decimal
/// strings; business dates are the compact yyyymmdd integer; timestamps are
/// RFC 3339 text.
fn migrate_v1(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL,
            business_date INTEGER NOT NULL,
            location_id TEXT,
            created_at TEXT,
            modified_at TEXT,
            synced_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_orders_business_date
            ON orders(business_date);

        CREATE TABLE IF NOT EXISTS checks (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL,
            order_guid TEXT NOT NULL,
            total TEXT NOT NULL DEFAULT '0',
            subtotal TEXT NOT NULL DEFAULT '0',
            tax TEXT NOT NULL DEFAULT '0',
            tip TEXT NOT NULL DEFAULT '0',
            discount TEXT NOT NULL DEFAULT '0',
            voided INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT,
            opened_at TEXT,
            closed_at TEXT,
            paid_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_checks_order_guid
            ON checks(order_guid);

        CREATE TABLE IF NOT EXISTS selections (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL,
            check_guid TEXT NOT NULL,
            item_guid TEXT,
            name TEXT,
            quantity TEXT NOT NULL DEFAULT '1',
            unit_price TEXT NOT NULL DEFAULT '0',
            tax TEXT NOT NULL DEFAULT '0',
            discount TEXT NOT NULL DEFAULT '0',
            voided INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_selections_check_guid
            ON selections(check_guid);

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL,
            check_guid TEXT NOT NULL,
            amount TEXT NOT NULL DEFAULT '0',
            tip TEXT NOT NULL DEFAULT '0',
            method TEXT,
            voided INTEGER NOT NULL DEFAULT 0,
            void_date TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_payments_check_guid
            ON payments(check_guid);

        CREATE TABLE IF NOT EXISTS revenue_overrides (
            business_date INTEGER PRIMARY KEY,
            revenue TEXT NOT NULL,
            check_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'UNVERIFIED',
            note TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS reconciliation_log (
            id TEXT PRIMARY KEY,
            business_date INTEGER NOT NULL,
            computed TEXT NOT NULL,
            effective TEXT NOT NULL,
            reference TEXT NOT NULL,
            delta TEXT NOT NULL,
            policy TEXT NOT NULL,
            verdict TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_reconciliation_log_date
            ON reconciliation_log(business_date);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Migration v2: one-time de-duplication (keep the earliest row per guid)
/// followed by the unique guid indexes that make `ON CONFLICT(guid)` upserts
/// possible. Databases populated before uniqueness was enforced can hold
/// duplicate rows; without this step those duplicates would keep inflating
/// every aggregate.
fn migrate_v2(conn: &Connection) -> Result<(), SyncError> {
    for table in ["orders", "checks", "selections", "payments"] {
        let removed = conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE id NOT IN (SELECT MIN(id) FROM {table} GROUP BY guid)"
            ),
            [],
        )?;
        if removed > 0 {
            warn!(table, removed, "removed duplicate rows during de-dup migration");
        }
    }

    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS uq_orders_guid ON orders(guid);
        CREATE UNIQUE INDEX IF NOT EXISTS uq_checks_guid ON checks(guid);
        CREATE UNIQUE INDEX IF NOT EXISTS uq_selections_guid ON selections(guid);
        CREATE UNIQUE INDEX IF NOT EXISTS uq_payments_guid ON payments(guid);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Column conversion helpers
// ---------------------------------------------------------------------------

pub(crate) fn decimal_to_sql(d: Decimal) -> String {
    d.to_string()
}

/// Parse a stored decimal column. Stored values are written by
/// `decimal_to_sql`, so a parse failure means outside tampering; it is
/// logged and treated as zero rather than poisoning a whole aggregate.
pub(crate) fn decimal_from_sql(s: &str) -> Decimal {
    s.parse().unwrap_or_else(|_| {
        warn!(value = %s, "unparseable decimal column, treating as zero");
        Decimal::ZERO
    })
}

pub(crate) fn time_to_sql(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub(crate) fn time_from_sql(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub(crate) fn business_date_to_sql(d: BusinessDate) -> i64 {
    d.compact() as i64
}
