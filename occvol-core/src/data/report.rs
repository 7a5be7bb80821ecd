//! Dual-table report parser.
//!
//! One monthly report is nominally a single CSV file but carries two
//! independent tables (contracts, then futures) with different column sets,
//! plus title lines, summary rows and blank separators. Two layouts exist:
//!
//! - `Sectioned` (older): each table is introduced by a title line,
//!   "Daily Volume by Exchange" and "Futures and Options on Futures".
//! - `BlankSeparated` (newer): no titles; a run of blank lines separates the
//!   tables.
//!
//! Summary rows are tagged with the report month's short name ("Oct Total"),
//! so the exclusion set is derived from the report's own anchor date.

use super::provider::DataError;
use chrono::NaiveDate;

pub const CONTRACTS_TITLE: &str = "Daily Volume by Exchange";
pub const FUTURES_TITLE: &str = "Futures and Options on Futures";

const FIXED_EXCLUSIONS: [&str; 3] = ["YTD", "Avg", "Daily"];
const REPORT_DATE_MARKER: &str = "Report Date";
const DATE_COLUMN: &str = "Date";

/// Which of the two known report shapes was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLayout {
    Sectioned,
    BlankSeparated,
}

/// One logical table: header line first, then data lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    /// Non-empty column names from the header line, in order.
    pub headers: Vec<String>,
    /// Header line followed by data lines, as cleaned CSV text.
    pub lines: Vec<String>,
}

impl ReportTable {
    pub fn header_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn data_lines(&self) -> &[String] {
        self.lines.get(1..).unwrap_or(&[])
    }

    /// The table as a standalone CSV document.
    pub fn to_csv(&self) -> String {
        self.lines.join("\n")
    }
}

/// Both tables of one report plus the report's own date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTables {
    pub anchor_date: NaiveDate,
    pub layout: ReportLayout,
    pub contracts: ReportTable,
    pub futures: ReportTable,
}

/// Split a raw report into its contracts and futures tables.
pub fn parse_report(raw: &str) -> Result<ParsedTables, DataError> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.lines().collect();

    let anchor_date = find_anchor_date(&lines)
        .ok_or_else(|| DataError::parse("could not find the report date", raw))?;
    let exclusions = exclusion_tokens(anchor_date);
    let layout = detect_layout(&lines);

    let mut segments = split_segments(&lines, layout, &exclusions);
    if segments.len() < 2 {
        return Err(DataError::parse(
            format!("expected two tables, found {}", segments.len()),
            raw,
        ));
    }
    segments.truncate(2);
    let futures_lines = segments.pop().unwrap_or_default();
    let contracts_lines = segments.pop().unwrap_or_default();

    Ok(ParsedTables {
        anchor_date,
        layout,
        contracts: build_table("contracts", contracts_lines)?,
        futures: build_table("futures", futures_lines)?,
    })
}

/// Locate the report's own date.
///
/// A "Report Date" line wins; otherwise the first line carrying any
/// `MM/DD/YYYY` token. Works for both layouts without fixed line offsets.
pub fn find_anchor_date(lines: &[&str]) -> Option<NaiveDate> {
    lines
        .iter()
        .filter(|line| line.contains(REPORT_DATE_MARKER))
        .find_map(|line| first_date_token(line))
        .or_else(|| lines.iter().find_map(|line| first_date_token(line)))
}

/// Substrings that mark a summary row for a report dated `anchor`.
pub fn exclusion_tokens(anchor: NaiveDate) -> Vec<String> {
    let mut tokens: Vec<String> = FIXED_EXCLUSIONS.iter().map(|t| t.to_string()).collect();
    tokens.push(anchor.format("%b").to_string());
    tokens
}

fn first_date_token(line: &str) -> Option<NaiveDate> {
    line.split(|c: char| !(c.is_ascii_digit() || c == '/'))
        .filter(|token| token.len() >= 8)
        .find_map(|token| NaiveDate::parse_from_str(token, "%m/%d/%Y").ok())
}

fn detect_layout(lines: &[&str]) -> ReportLayout {
    if lines
        .iter()
        .any(|line| line.contains(CONTRACTS_TITLE) || line.contains(FUTURES_TITLE))
    {
        ReportLayout::Sectioned
    } else {
        ReportLayout::BlankSeparated
    }
}

fn is_blank(line: &str) -> bool {
    line.chars().all(|c| c == ',' || c.is_whitespace())
}

fn clean(line: &str) -> &str {
    line.trim_end().trim_end_matches(',')
}

/// Filter noise and group surviving lines into tables.
///
/// In the sectioned layout a title line starts a new table and lines before
/// the first title are ignored; blanks inside a section are noise. In the
/// blank-separated layout a blank run closes the current table.
fn split_segments(lines: &[&str], layout: ReportLayout, exclusions: &[String]) -> Vec<Vec<String>> {
    let mut segments = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_section = layout == ReportLayout::BlankSeparated;

    for line in lines {
        match layout {
            ReportLayout::Sectioned => {
                if line.contains(CONTRACTS_TITLE) || line.contains(FUTURES_TITLE) {
                    close_segment(&mut segments, &mut current);
                    in_section = true;
                    continue;
                }
                if !in_section || is_blank(line) {
                    continue;
                }
            }
            ReportLayout::BlankSeparated => {
                if is_blank(line) {
                    close_segment(&mut segments, &mut current);
                    continue;
                }
            }
        }

        if line.contains(REPORT_DATE_MARKER) || exclusions.iter().any(|t| line.contains(t.as_str()))
        {
            continue;
        }
        current.push(clean(line).to_string());
    }
    close_segment(&mut segments, &mut current);

    segments
}

fn close_segment(segments: &mut Vec<Vec<String>>, current: &mut Vec<String>) {
    if !current.is_empty() {
        segments.push(std::mem::take(current));
    }
}

/// Split one CSV line into trimmed fields.
pub(crate) fn split_fields(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    reader
        .records()
        .next()
        .and_then(Result::ok)
        .map(|record| record.iter().map(str::to_string).collect())
        .unwrap_or_default()
}

fn is_header(line: &str) -> bool {
    line.contains(',')
        && split_fields(line)
            .iter()
            .any(|field| field.eq_ignore_ascii_case(DATE_COLUMN))
}

/// Drop any preamble before the header line and record the column names.
fn build_table(name: &str, lines: Vec<String>) -> Result<ReportTable, DataError> {
    let header_at = lines.iter().position(|line| is_header(line)).ok_or_else(|| {
        DataError::parse(
            format!("{name} table has no header row"),
            lines.first().map(String::as_str).unwrap_or(""),
        )
    })?;
    let lines: Vec<String> = lines.into_iter().skip(header_at).collect();
    let headers = split_fields(&lines[0])
        .into_iter()
        .filter(|field| !field.is_empty())
        .collect();

    Ok(ReportTable { headers, lines })
}
