//! Error taxonomy for the sync engine.
//!
//! Only pass-level fatal conditions surface as `SyncError`: exhausted
//! authentication, exhausted page-fetch retries, or a broken storage layer.
//! Per-record conditions (a payload missing its guid, a single row failing to
//! upsert) are logged and counted in the pass summary instead, and a
//! reconciliation mismatch is a verdict, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials rejected by the POS identity endpoint, or a data endpoint
    /// still returning 401 after the single re-authentication retry.
    /// Fatal for the pass.
    #[error("authentication failed (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    /// A fetch exhausted its retries or hit a permanent 4xx. Fatal for the
    /// window it belongs to; pages fetched before it are retained.
    #[error("fetch failed ({what}): {detail}")]
    Fetch { what: String, detail: String },

    /// Storage failure outside the per-row upsert path (schema, migration,
    /// aggregate query).
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Poisoned connection lock or other unrecoverable internal state.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn fetch(what: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::Fetch {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error aborts an entire sync pass (as opposed to being
    /// an environment problem the caller should surface directly).
    pub fn is_pass_fatal(&self) -> bool {
        matches!(self, SyncError::Auth { .. } | SyncError::Fetch { .. })
    }
}
