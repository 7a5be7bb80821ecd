//! Contracts table → typed daily volume records.

use super::provider::{DataError, UnavailableKind, VolumeRecord};
use super::report::{ParsedTables, ReportTable};
use crate::month::month_start;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

/// Parse the contracts table into records, optionally merged with `existing`.
///
/// The result is ordered by date ascending. `existing` is never modified; on
/// a date present in both, the existing record is kept.
pub fn build_records(
    tables: &ParsedTables,
    existing: Option<&[VolumeRecord]>,
) -> Result<Vec<VolumeRecord>, DataError> {
    let parsed = parse_table(&tables.contracts)?;
    if parsed.is_empty() {
        return Err(DataError::Unavailable {
            month: month_start(tables.anchor_date),
            kind: UnavailableKind::NoRows,
        });
    }

    match existing {
        Some(existing) if !existing.is_empty() => merge_records(existing, parsed),
        _ => Ok(parsed),
    }
}

/// Union of two record sets keyed by date; `existing` wins on collisions.
///
/// Fails when the category sets differ: the caller decides whether to coerce
/// or reject.
pub fn merge_records(
    existing: &[VolumeRecord],
    incoming: Vec<VolumeRecord>,
) -> Result<Vec<VolumeRecord>, DataError> {
    if let (Some(old), Some(new)) = (existing.first(), incoming.first()) {
        let expected = old.category_set();
        let actual = new.category_set();
        if expected != actual {
            return Err(DataError::SchemaMismatch(format!(
                "report columns {actual:?} differ from existing columns {expected:?}"
            )));
        }
    }

    let mut by_date: BTreeMap<NaiveDate, VolumeRecord> =
        incoming.into_iter().map(|r| (r.date, r)).collect();
    for record in existing {
        by_date.insert(record.date, record.clone());
    }
    Ok(by_date.into_values().collect())
}

fn parse_table(table: &ReportTable) -> Result<Vec<VolumeRecord>, DataError> {
    let csv_text = table.to_csv();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DataError::parse(format!("unreadable header: {e}"), table.header_line()))?
        .clone();
    let date_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("date"))
        .ok_or_else(|| DataError::parse("no Date column", table.header_line()))?;
    let categories: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != date_idx && !h.is_empty())
        .collect();

    let data_lines = table.data_lines();
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(data_lines.len());

    for (row, result) in reader.records().enumerate() {
        let line = data_lines.get(row).map(String::as_str).unwrap_or("");
        let fields =
            result.map_err(|e| DataError::parse(format!("row {}: {e}", row + 1), line))?;

        let raw_date = fields.get(date_idx).unwrap_or("");
        let date = parse_date(raw_date).ok_or_else(|| {
            DataError::parse(format!("row {}: invalid date '{raw_date}'", row + 1), line)
        })?;
        if !seen.insert(date) {
            return Err(DataError::parse(
                format!("row {}: duplicate date {date}", row + 1),
                line,
            ));
        }

        let mut volumes = Vec::with_capacity(categories.len());
        for (idx, name) in &categories {
            let raw = fields.get(*idx).unwrap_or("");
            let value = parse_volume(raw).ok_or_else(|| {
                DataError::parse(
                    format!("row {}: invalid {name} volume '{raw}'", row + 1),
                    line,
                )
            })?;
            volumes.push((name.to_string(), value));
        }

        records.push(VolumeRecord::new(date, volumes));
    }

    records.sort_by_key(|r| r.date);
    Ok(records)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// Integer volume with thousands separators; an empty or absent cell reads as zero.
fn parse_volume(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    let digits = digits.trim();
    if digits.is_empty() {
        return Some(0);
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::report::parse_report;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn tables(contracts: &str) -> ParsedTables {
        let raw = format!("{contracts}\n\nDate,OOF\n01/02/2024,1\n");
        parse_report(&raw).unwrap()
    }

    #[test]
    fn parses_thousands_separators() {
        let t = tables("Date,Equity,OCC Total\n01/03/2024,\"1,234,567\",\"2,000,000\"\n01/02/2024,5,6");
        let records = build_records(&t, None).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, d(2024, 1, 2));
        assert_eq!(records[1].get("Equity"), Some(1_234_567));
        assert_eq!(records[1].get("OCC Total"), Some(2_000_000));
    }

    #[test]
    fn categories_follow_header_order() {
        let t = tables("Date,Equity,Debt,OCC Total\n01/02/2024,1,2,3");
        let records = build_records(&t, None).unwrap();
        let cats: Vec<&str> = records[0].categories().collect();
        assert_eq!(cats, vec!["Equity", "Debt", "OCC Total"]);
    }

    #[test]
    fn empty_and_trailing_cells_read_as_zero() {
        let t = tables("Date,Equity,Debt,OCC Total\n01/02/2024,,,\n01/03/2024,7,\"\",7");
        let records = build_records(&t, None).unwrap();
        assert_eq!(records[0].get("Equity"), Some(0));
        assert_eq!(records[0].get("OCC Total"), Some(0));
        assert_eq!(records[1].get("Debt"), Some(0));
    }

    #[test]
    fn header_only_table_is_unavailable() {
        let raw = "Report Date: 02/29/2024\nDate,Equity\n\nDate,OOF\n";
        let t = parse_report(raw).unwrap();
        let err = build_records(&t, None).unwrap_err();
        match err {
            DataError::Unavailable { month, kind } => {
                assert_eq!(month, d(2024, 2, 1));
                assert_eq!(kind, UnavailableKind::NoRows);
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn bad_number_is_a_parse_error() {
        let t = tables("Date,Equity\n01/02/2024,12x");
        let err = build_records(&t, None).unwrap_err();
        assert!(matches!(err, DataError::Parse { .. }));
    }

    #[test]
    fn duplicate_date_is_a_parse_error() {
        let t = tables("Date,Equity\n01/02/2024,1\n01/02/2024,2");
        assert!(matches!(
            build_records(&t, None).unwrap_err(),
            DataError::Parse { .. }
        ));
    }

    #[test]
    fn merge_is_ordered_union_and_keeps_existing() {
        let existing = vec![
            VolumeRecord::new(d(2024, 1, 3), vec![("Equity".into(), 100)]),
            VolumeRecord::new(d(2024, 1, 1), vec![("Equity".into(), 50)]),
        ];
        let t = tables("Date,Equity\n01/02/2024,1\n01/03/2024,999");
        let merged = build_records(&t, Some(existing.as_slice())).unwrap();

        let dates: Vec<NaiveDate> = merged.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3)]);
        assert_eq!(merged[2].get("Equity"), Some(100));
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn merge_rejects_different_categories() {
        let existing = vec![VolumeRecord::new(
            d(2024, 1, 1),
            vec![("Equity".into(), 1), ("Debt".into(), 0)],
        )];
        let t = tables("Date,Equity,OOF\n01/02/2024,1,2");
        let err = build_records(&t, Some(existing.as_slice())).unwrap_err();
        assert!(matches!(err, DataError::SchemaMismatch(_)));
    }

    #[test]
    fn empty_existing_behaves_like_none() {
        let t = tables("Date,Equity\n01/02/2024,1");
        assert_eq!(build_records(&t, Some(&[][..])).unwrap().len(), 1);
    }
}
