//! Report source trait, the volume record, and structured error types.
//!
//! The ReportSource trait abstracts over where a month's raw report comes
//! from (the publisher's HTTP endpoint, a fixture in tests) so the
//! reconciler can be driven without a network.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// One day of volume: the date plus every category the report header declared.
///
/// Categories keep the order of the source header. The set is not fixed
/// across historical report formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub date: NaiveDate,
    pub volumes: Vec<(String, u64)>,
}

impl VolumeRecord {
    pub fn new(date: NaiveDate, volumes: Vec<(String, u64)>) -> Self {
        Self { date, volumes }
    }

    /// Volume for a category, matched case-insensitively.
    pub fn get(&self, category: &str) -> Option<u64> {
        self.volumes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(category))
            .map(|(_, v)| *v)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.volumes.iter().map(|(name, _)| name.as_str())
    }

    /// Category names as a set, for schema comparison.
    pub fn category_set(&self) -> BTreeSet<String> {
        self.categories().map(str::to_string).collect()
    }
}

/// Which transport-level fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connection,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Timeout => f.write_str("timeout"),
            TransportKind::Connection => f.write_str("connection"),
        }
    }
}

/// Why a month has no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableKind {
    /// The publisher rejected the report date.
    InvalidReportDate,
    /// The report exists but is not publicly available.
    NotPublished,
    /// The report parsed but carried no daily rows.
    NoRows,
}

impl fmt::Display for UnavailableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableKind::InvalidReportDate => f.write_str("invalid report date"),
            UnavailableKind::NotPublished => f.write_str("report not published"),
            UnavailableKind::NoRows => f.write_str("no daily rows"),
        }
    }
}

/// What the reconciler does with a failed month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log a warning, skip the month, keep walking.
    Skip,
    /// Stop the run and surface the error.
    Abort,
}

/// Structured error types for ingest operations.
///
/// Callers distinguish "this month has no data" from "the network is down"
/// from "the format changed" by variant, never by message.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{kind} failure: {detail}")]
    Transport { kind: TransportKind, detail: String },

    #[error("data unavailable for {month}: {kind}")]
    Unavailable {
        month: NaiveDate,
        kind: UnavailableKind,
    },

    #[error("report parse failed: {detail} (near: {snippet:?})")]
    Parse { detail: String, snippet: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error(
        "invalid identifier '{0}': only ASCII letters, digits and underscores are allowed"
    )]
    InvalidIdentifier(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),
}

impl DataError {
    pub fn timeout(detail: impl Into<String>) -> Self {
        DataError::Transport {
            kind: TransportKind::Timeout,
            detail: detail.into(),
        }
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        DataError::Transport {
            kind: TransportKind::Connection,
            detail: detail.into(),
        }
    }

    /// Parse error carrying at most the first 80 characters of the offending input.
    pub fn parse(detail: impl Into<String>, input: &str) -> Self {
        DataError::Parse {
            detail: detail.into(),
            snippet: input.chars().take(80).collect(),
        }
    }

    /// Skip-or-abort policy for a failed month.
    pub fn disposition(&self) -> Disposition {
        match self {
            DataError::Transport { .. } | DataError::Unavailable { .. } => Disposition::Skip,
            DataError::Parse { .. }
            | DataError::SchemaMismatch(_)
            | DataError::InvalidIdentifier(_)
            | DataError::StoreError(_)
            | DataError::ParquetError(_) => Disposition::Abort,
        }
    }
}

/// Raw report text for one month, as returned by a source.
#[derive(Debug, Clone)]
pub struct RawReport {
    pub month: NaiveDate,
    pub text: String,
}

/// Trait for report sources (the publisher endpoint, canned fixtures).
pub trait ReportSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the raw report for the month containing `month`.
    fn fetch(&self, month: NaiveDate) -> Result<RawReport, DataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VolumeRecord {
        VolumeRecord::new(
            NaiveDate::from_ymd_opt(2025, 10, 10).unwrap(),
            vec![("Equity".into(), 10), ("OCC Total".into(), 12)],
        )
    }

    #[test]
    fn get_is_case_insensitive() {
        assert_eq!(record().get("occ total"), Some(12));
        assert_eq!(record().get("Debt"), None);
    }

    #[test]
    fn transport_and_unavailable_are_skipped() {
        assert_eq!(DataError::timeout("t").disposition(), Disposition::Skip);
        assert_eq!(DataError::connection("c").disposition(), Disposition::Skip);
        let unavailable = DataError::Unavailable {
            month: NaiveDate::from_ymd_opt(2007, 12, 1).unwrap(),
            kind: UnavailableKind::InvalidReportDate,
        };
        assert_eq!(unavailable.disposition(), Disposition::Skip);
    }

    #[test]
    fn structural_errors_abort() {
        assert_eq!(DataError::parse("bad", "x").disposition(), Disposition::Abort);
        assert_eq!(
            DataError::SchemaMismatch("cols".into()).disposition(),
            Disposition::Abort
        );
        assert_eq!(
            DataError::InvalidIdentifier("a-b".into()).disposition(),
            Disposition::Abort
        );
    }

    #[test]
    fn parse_snippet_is_truncated() {
        let long = "x".repeat(500);
        match DataError::parse("too long", &long) {
            DataError::Parse { snippet, .. } => assert_eq!(snippet.len(), 80),
            other => panic!("expected Parse, got {other:?}"),
        }
    }
}
