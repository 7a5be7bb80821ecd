//! OCC monthly volume report source.
//!
//! Fetches one month's dual-table CSV report over blocking HTTP. The request
//! carries the report date (first of month, `YYYYMMDD`) and the requested
//! format. Transport faults are classified as timeout or connection; the two
//! sentinel phrases the publisher embeds in the body become data
//! unavailability. There is no retry here: whether a failed month is skipped
//! is the reconciler's call.

use super::provider::{DataError, RawReport, ReportSource, UnavailableKind};
use crate::log::RunLog;
use crate::month::{month_start, MonthCursor};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

/// Fixed deadline for one report request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const INVALID_DATE_MARKER: &str = "Invalid report Date";
const NOT_AVAILABLE_MARKER: &str = "Report is not available";

/// HTTP source for the publisher's monthly volume report.
pub struct OccReportSource {
    client: reqwest::blocking::Client,
    base_url: String,
    format: String,
    timeout: Duration,
    log: Arc<dyn RunLog>,
}

impl OccReportSource {
    pub fn new(
        base_url: impl Into<String>,
        format: impl Into<String>,
        timeout: Duration,
        log: Arc<dyn RunLog>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            format: format.into(),
            timeout,
            log,
        })
    }

    /// Source with the standard 30 second deadline.
    pub fn with_default_timeout(
        base_url: impl Into<String>,
        format: impl Into<String>,
        log: Arc<dyn RunLog>,
    ) -> Result<Self, DataError> {
        Self::new(base_url, format, REQUEST_TIMEOUT, log)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, e: reqwest::Error) -> DataError {
        if e.is_timeout() {
            DataError::timeout(format!(
                "request timed out after {} seconds",
                self.timeout.as_secs_f64()
            ))
        } else {
            DataError::connection(format!("failed to fetch data from {}: {e}", self.base_url))
        }
    }
}

impl ReportSource for OccReportSource {
    fn name(&self) -> &str {
        "occ"
    }

    fn fetch(&self, month: NaiveDate) -> Result<RawReport, DataError> {
        let month = month_start(month);
        let url = report_url(&self.base_url, month, &self.format)?;
        self.log.debug(&format!(
            "Retrieving monthly volume report for {} from {}",
            MonthCursor::of(month),
            self.base_url
        ));

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::connection(format!(
                "failed to fetch data from {}: HTTP {status}",
                self.base_url
            )));
        }

        let text = resp.text().map_err(|e| self.transport_error(e))?;
        classify_body(month, &text)?;

        Ok(RawReport { month, text })
    }
}

/// Build the request URL for `month`; the date is normalized to the first of the month.
pub fn report_url(base_url: &str, month: NaiveDate, format: &str) -> Result<reqwest::Url, DataError> {
    let report_date = month_start(month).format("%Y%m%d").to_string();
    let format = format.to_lowercase();
    reqwest::Url::parse_with_params(
        base_url,
        &[("reportDate", report_date.as_str()), ("format", format.as_str())],
    )
    .map_err(|e| DataError::connection(format!("invalid report url '{base_url}': {e}")))
}

/// Detect the publisher's "no report" sentinels in an otherwise successful body.
pub fn classify_body(month: NaiveDate, body: &str) -> Result<(), DataError> {
    let kind = if body.contains(INVALID_DATE_MARKER) {
        UnavailableKind::InvalidReportDate
    } else if body.contains(NOT_AVAILABLE_MARKER) {
        UnavailableKind::NotPublished
    } else {
        return Ok(());
    };
    Err(DataError::Unavailable {
        month: month_start(month),
        kind,
    })
}
