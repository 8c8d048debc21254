//! Error taxonomy for the cleansing job.
//!
//! Fatal failures (catalog, source decoding, sink, bookkeeping) surface as
//! [`EtlError`]. Per-record cast failures never do: the mapper turns them into
//! nulls. Quality evaluation has its own non-error outcome type, see
//! [`crate::quality::QualityOutcome`].

use crate::storage::CloudIOError;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Debug, Error)]
pub enum EtlError {
    /// The catalog has no entry for `database.table`.
    #[error("table {database}.{table} not found in catalog")]
    TableNotFound { database: String, table: String },

    /// Any other catalog failure (unreadable catalog document, bad definition).
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The push-down predicate could not be parsed or references non-partition columns.
    #[error("invalid push-down predicate `{predicate}`: {reason}")]
    InvalidPredicate { predicate: String, reason: String },

    /// A source object could not be decoded.
    #[error("failed to decode {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Object storage failure while reading the source.
    #[error("storage error: {0}")]
    Storage(#[from] CloudIOError),

    /// Failure while encoding or writing output objects.
    #[error("sink error: {0}")]
    Sink(String),

    /// A record that does not satisfy the push-down predicate reached the writer.
    #[error("record violates push-down predicate `{predicate}`: {detail}")]
    PushdownViolation { predicate: String, detail: String },

    /// Quality gate failure under the strict publishing strategy.
    #[error("data quality gate failed: {0}")]
    QualityGate(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing the job bookmark failed.
    #[error("bookmark error: {0}")]
    Bookmark(String),
}

impl EtlError {
    pub(crate) fn decode(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sink(reason: impl std::fmt::Display) -> Self {
        Self::Sink(reason.to_string())
    }
}
