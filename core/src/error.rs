use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the ledger and the dashboard session.
///
/// Malformed nutrient strings never reach this type; they normalize to 0 while
/// deserializing. Stale results and no-op edits are reported through
/// [`crate::session::Outcome`] instead.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("request failed: {0:#}")]
    Network(#[from] anyhow::Error),

    #[error("analysis entry '{0}' not found")]
    EntryNotFound(String),

    #[error("cannot select {date}: it is after today ({today})")]
    DateInFuture { date: NaiveDate, today: NaiveDate },

    #[error("a scan is already in progress")]
    ScanInFlight,

    #[error("another change is still waiting for the server")]
    MutationInFlight,

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),
}
