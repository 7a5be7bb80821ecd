//! Synthetic monthly reports and an offline report source.
//!
//! Reports are deterministic: every weekday of the month gets one row whose
//! volumes derive from the date, so the same month always parses to the same
//! records. Months before 2021 are rendered in the sectioned layout, later
//! months in the blank-separated one.

use crate::data::provider::{DataError, RawReport, ReportSource, UnavailableKind};
use crate::data::report::{ReportLayout, CONTRACTS_TITLE, FUTURES_TITLE};
use crate::month::{month_start, MonthCursor};
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Mutex;

pub const CONTRACT_COLUMNS: [&str; 5] = ["Equity", "Index/Others", "Debt", "Futures", "OCC Total"];
const FUTURES_COLUMNS: [&str; 3] = ["OOF", "Futures", "Total"];

/// Layout the publisher used for `month`.
pub fn layout_for(month: NaiveDate) -> ReportLayout {
    if month.year() < 2021 {
        ReportLayout::Sectioned
    } else {
        ReportLayout::BlankSeparated
    }
}

/// Weekdays of the month containing `month`.
pub fn trading_days(month: NaiveDate) -> Vec<NaiveDate> {
    let start = month_start(month);
    start
        .iter_days()
        .take_while(|d| d.month() == start.month())
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Contract volumes for one day: equity, index, debt, futures, total.
pub fn contract_volumes(date: NaiveDate) -> [u64; 5] {
    let seed = u64::from(date.ordinal()) + 366 * date.year().unsigned_abs() as u64;
    let equity = 20_000_000 + (seed * 7_919) % 15_000_000;
    let index = 2_000_000 + (seed * 104_729) % 3_000_000;
    let debt = 0;
    let futures = 100_000 + (seed * 1_299_709) % 400_000;
    [equity, index, debt, futures, equity + index + debt + futures]
}

fn quoted_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    out.push('"');
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn row(prefix: &str, label: &str, values: &[u64]) -> String {
    let cells: Vec<String> = values.iter().map(|v| quoted_number(*v)).collect();
    format!("{prefix}\"{label}\",{}", cells.join(","))
}

/// Render the full report text for the month containing `month`.
pub fn synthetic_report(month: NaiveDate, layout: ReportLayout) -> String {
    let days = trading_days(month);
    let anchor = days.last().copied().unwrap_or_else(|| month_start(month));
    let short = anchor.format("%b").to_string();
    let prefix = match layout {
        ReportLayout::Sectioned => ",,",
        ReportLayout::BlankSeparated => "",
    };

    let mut contract_totals = [0u64; 5];
    let mut contract_rows = Vec::with_capacity(days.len());
    let mut futures_rows = Vec::with_capacity(days.len());
    for day in &days {
        let volumes = contract_volumes(*day);
        for (total, v) in contract_totals.iter_mut().zip(volumes) {
            *total += v;
        }
        let label = day.format("%m/%d/%Y").to_string();
        contract_rows.push(row(prefix, &label, &volumes));
        let oof = volumes[3] / 10;
        futures_rows.push(row(prefix, &label, &[oof, volumes[3], oof + volumes[3]]));
    }

    let contract_header = format!("{prefix}Date,{}", CONTRACT_COLUMNS.join(","));
    let futures_header = format!("{prefix}Date,{}", FUTURES_COLUMNS.join(","));
    let report_date = format!("Report Date: {}", anchor.format("%m/%d/%Y"));
    let mut out = String::new();

    match layout {
        ReportLayout::Sectioned => {
            let _ = writeln!(out, ",{CONTRACTS_TITLE},,,");
            let _ = writeln!(out, ",{report_date},,,");
            let _ = writeln!(out, ",,,,");
            let _ = writeln!(out, "{contract_header}");
            for line in &contract_rows {
                let _ = writeln!(out, "{line}");
            }
            let _ = writeln!(out, "{}", row(prefix, &format!("{short} Total"), &contract_totals));
            let _ = writeln!(out, "{}", row(prefix, "YTD Total", &contract_totals));
            let _ = writeln!(out);
            let _ = writeln!(out, ",{FUTURES_TITLE},,,");
            let _ = writeln!(out, "{futures_header}");
            for line in &futures_rows {
                let _ = writeln!(out, "{line}");
            }
            let _ = writeln!(out, "{}", row(prefix, "Avg Daily Volume", &[0, 0, 0]));
        }
        ReportLayout::BlankSeparated => {
            let _ = writeln!(out, "{report_date}");
            let _ = writeln!(out, "{contract_header}");
            for line in &contract_rows {
                let _ = writeln!(out, "{line}");
            }
            let _ = writeln!(out, "{}", row(prefix, &format!("{short} Total"), &contract_totals));
            let _ = writeln!(out, "{}", row(prefix, "Avg Daily", &contract_totals));
            let _ = writeln!(out);
            let _ = writeln!(out);
            let _ = writeln!(out, "{futures_header}");
            for line in &futures_rows {
                let _ = writeln!(out, "{line}");
            }
        }
    }
    out
}

/// Offline report source serving synthetic reports.
///
/// Individual months can be marked unavailable, timing out, or malformed.
/// Every fetch is recorded, so callers can check exactly which months a run
/// asked for and in which order.
#[derive(Debug, Default)]
pub struct FixtureSource {
    unavailable: BTreeSet<NaiveDate>,
    timing_out: BTreeSet<NaiveDate>,
    malformed: BTreeSet<NaiveDate>,
    available_from: Option<NaiveDate>,
    fetched: Mutex<Vec<NaiveDate>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Months before `month` answer with the invalid-date sentinel.
    pub fn available_from(mut self, month: NaiveDate) -> Self {
        self.available_from = Some(month_start(month));
        self
    }

    pub fn unavailable(mut self, month: NaiveDate) -> Self {
        self.unavailable.insert(month_start(month));
        self
    }

    pub fn timing_out(mut self, month: NaiveDate) -> Self {
        self.timing_out.insert(month_start(month));
        self
    }

    /// Month whose body has no recognizable report date.
    pub fn malformed(mut self, month: NaiveDate) -> Self {
        self.malformed.insert(month_start(month));
        self
    }

    /// Months requested so far, in request order.
    pub fn fetched(&self) -> Vec<NaiveDate> {
        self.fetched
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

impl ReportSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch(&self, month: NaiveDate) -> Result<RawReport, DataError> {
        let month = month_start(month);
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(month);
        }

        let too_early = self.available_from.is_some_and(|from| month < from);
        if too_early || self.unavailable.contains(&month) {
            return Err(DataError::Unavailable {
                month,
                kind: UnavailableKind::InvalidReportDate,
            });
        }
        if self.timing_out.contains(&month) {
            return Err(DataError::timeout(format!(
                "fixture timeout for {}",
                MonthCursor::of(month)
            )));
        }
        let text = if self.malformed.contains(&month) {
            "<html>maintenance</html>".to_string()
        } else {
            synthetic_report(month, layout_for(month))
        };
        Ok(RawReport { month, text })
    }
}
