//! Append-only volume store keyed by date.
//!
//! Layout: `{store_dir}/{table}/part-{first}-{last}[-n].parquet`
//!
//! Features:
//! - One Parquet part per append, written atomically (.tmp then rename)
//! - Appends skip dates already stored, so re-runs never duplicate rows
//! - Column set per part follows the records (report formats changed over the years)
//! - Corrupt parts are quarantined ({filename}.quarantined) and left out of reads
//! - Metadata sidecar per table (date range, row count, hash)

use super::provider::{DataError, VolumeRecord};
use crate::log::RunLog;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DATE_COLUMN: &str = "Date";
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Reject destination names that are not `[A-Za-z0-9_]+`.
pub fn validate_identifier(name: &str) -> Result<(), DataError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DataError::InvalidIdentifier(name.to_string()))
    }
}

/// Date range currently held by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Empty,
    Range { min: NaiveDate, max: NaiveDate },
}

impl Coverage {
    pub fn from_records(records: &[VolumeRecord]) -> Self {
        let min = records.iter().map(|r| r.date).min();
        let max = records.iter().map(|r| r.date).max();
        match (min, max) {
            (Some(min), Some(max)) => Coverage::Range { min, max },
            _ => Coverage::Empty,
        }
    }

    pub fn min(&self) -> Option<NaiveDate> {
        match self {
            Coverage::Empty => None,
            Coverage::Range { min, .. } => Some(*min),
        }
    }

    pub fn max(&self) -> Option<NaiveDate> {
        match self {
            Coverage::Empty => None,
            Coverage::Range { max, .. } => Some(*max),
        }
    }
}

/// Append-only persistence for daily volume records.
pub trait VolumeStore {
    /// Destination name (validated on every read and write).
    fn table(&self) -> &str;

    /// Persist records whose dates are not stored yet. Returns rows written.
    fn append(&mut self, records: &[VolumeRecord]) -> Result<usize, DataError>;

    /// Every stored record, ascending by date. Empty when nothing was stored yet.
    fn read_all(&self) -> Result<Vec<VolumeRecord>, DataError>;

    fn coverage(&self) -> Result<Coverage, DataError> {
        Ok(Coverage::from_records(&self.read_all()?))
    }
}

/// Records from `incoming` whose dates are absent from `known` (first occurrence wins).
fn unseen<'a>(known: &HashSet<NaiveDate>, incoming: &'a [VolumeRecord]) -> Vec<&'a VolumeRecord> {
    let mut taken = HashSet::new();
    incoming
        .iter()
        .filter(|r| !known.contains(&r.date) && taken.insert(r.date))
        .collect()
}

// ── In-memory store ─────────────────────────────────────────────────

/// Store held in memory; same de-duplication rules as [`ParquetStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: String,
    records: Vec<VolumeRecord>,
    append_calls: usize,
}

impl MemoryStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Store pre-loaded with `records` (not counted as an append).
    pub fn with_records(table: impl Into<String>, mut records: Vec<VolumeRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        Self {
            table: table.into(),
            records,
            append_calls: 0,
        }
    }

    /// Number of appends that wrote at least one row.
    pub fn append_calls(&self) -> usize {
        self.append_calls
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl VolumeStore for MemoryStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn append(&mut self, records: &[VolumeRecord]) -> Result<usize, DataError> {
        validate_identifier(&self.table)?;
        let known: HashSet<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        let fresh = unseen(&known, records);
        if fresh.is_empty() {
            return Ok(0);
        }
        let written = fresh.len();
        self.records.extend(fresh.into_iter().cloned());
        self.records.sort_by_key(|r| r.date);
        self.append_calls += 1;
        Ok(written)
    }

    fn read_all(&self) -> Result<Vec<VolumeRecord>, DataError> {
        validate_identifier(&self.table)?;
        Ok(self.records.clone())
    }
}

// ── Parquet store ───────────────────────────────────────────────────

/// Metadata sidecar for a stored table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub table: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_count: usize,
    pub part_count: usize,
    pub data_hash: String,
    pub updated_at: chrono::NaiveDateTime,
}

/// The Parquet-backed store.
pub struct ParquetStore {
    store_dir: PathBuf,
    table: String,
    log: Arc<dyn RunLog>,
    /// Rows on disk, loaded by the first append and extended by each later one.
    loaded: Option<Vec<VolumeRecord>>,
}

impl ParquetStore {
    pub fn new(store_dir: impl Into<PathBuf>, table: impl Into<String>, log: Arc<dyn RunLog>) -> Self {
        Self {
            store_dir: store_dir.into(),
            table: table.into(),
            log,
            loaded: None,
        }
    }

    /// Root directory of the store.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Directory holding this table's parts: `{store_dir}/{table}/`
    pub fn table_dir(&self) -> PathBuf {
        self.store_dir.join(&self.table)
    }

    fn meta_path(&self) -> PathBuf {
        self.table_dir().join("meta.json")
    }

    /// Parquet parts currently in the table directory, sorted by name.
    fn part_paths(&self) -> Result<Vec<PathBuf>, DataError> {
        let entries = fs::read_dir(self.table_dir())
            .map_err(|e| DataError::StoreError(format!("read dir: {e}")))?;
        let mut parts = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| DataError::StoreError(format!("dir entry: {e}")))?
                .path();
            // Skip meta.json, .tmp and .quarantined files
            if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                parts.push(path);
            }
        }
        parts.sort();
        Ok(parts)
    }

    /// First free part name for a batch spanning `first..=last`.
    fn next_part_path(&self, first: NaiveDate, last: NaiveDate) -> PathBuf {
        let stem = format!("part-{}-{}", first.format("%Y%m%d"), last.format("%Y%m%d"));
        let dir = self.table_dir();
        let mut path = dir.join(format!("{stem}.parquet"));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{stem}-{n}.parquet"));
            n += 1;
        }
        path
    }

    /// Read the metadata sidecar, if one has been written.
    pub fn meta(&self) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_meta(&self, records: &[VolumeRecord]) -> Result<(), DataError> {
        let coverage = Coverage::from_records(records);
        let (Some(start_date), Some(end_date)) = (coverage.min(), coverage.max()) else {
            return Ok(());
        };
        let meta = StoreMeta {
            table: self.table.clone(),
            start_date,
            end_date,
            row_count: records.len(),
            part_count: self.part_paths()?.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(records)
                    .map_err(|e| DataError::StoreError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            updated_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::StoreError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(), meta_json)
            .map_err(|e| DataError::StoreError(format!("meta write: {e}")))
    }
}

impl VolumeStore for ParquetStore {
    fn table(&self) -> &str {
        &self.table
    }

    fn append(&mut self, records: &[VolumeRecord]) -> Result<usize, DataError> {
        validate_identifier(&self.table)?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut stored = match self.loaded.take() {
            Some(stored) => stored,
            None => self.read_all()?,
        };
        let known: HashSet<NaiveDate> = stored.iter().map(|r| r.date).collect();
        let fresh = unseen(&known, records);
        let dropped = records.len() - fresh.len();
        if dropped > 0 {
            self.log.debug(&format!(
                "Skipping {dropped} rows already stored in {}",
                self.table
            ));
        }
        let (Some(first), Some(last)) = (
            fresh.iter().map(|r| r.date).min(),
            fresh.iter().map(|r| r.date).max(),
        ) else {
            self.loaded = Some(stored);
            return Ok(0);
        };

        let table_dir = self.table_dir();
        fs::create_dir_all(&table_dir)
            .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))?;

        let written = fresh.len();
        self.log.debug(&format!(
            "Starting write of {written} rows to {}",
            table_dir.display()
        ));

        let df = records_to_dataframe(&fresh)?;
        let path = self.next_part_path(first, last);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::StoreError(format!("atomic rename failed: {e}"))
        })?;

        stored.extend(fresh.into_iter().cloned());
        stored.sort_by_key(|r| r.date);
        self.write_meta(&stored)?;
        self.loaded = Some(stored);

        self.log
            .debug(&format!("Successfully wrote {}", path.display()));
        Ok(written)
    }

    fn read_all(&self) -> Result<Vec<VolumeRecord>, DataError> {
        validate_identifier(&self.table)?;

        let table_dir = self.table_dir();
        if !table_dir.is_dir() {
            self.log.warning(&format!(
                "Unable to find {}, returning no records",
                table_dir.display()
            ));
            return Ok(Vec::new());
        }
        self.log.debug(&format!(
            "Attempting to read {} from {}",
            self.table,
            self.store_dir.display()
        ));

        let mut all = Vec::new();
        for path in self.part_paths()? {
            match load_part(&path) {
                Ok(records) => all.extend(records),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    self.log.warning(&format!(
                        "quarantining corrupt store part {}: {e}",
                        path.display()
                    ));
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        all.sort_by_key(|r| r.date);
        self.log
            .debug(&format!("Successfully read {} rows", all.len()));
        Ok(all)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert records to a DataFrame: a Date column plus one UInt64 column per category.
///
/// Categories missing from a record are stored as nulls.
fn records_to_dataframe(records: &[&VolumeRecord]) -> Result<DataFrame, DataError> {
    let mut categories: Vec<&str> = Vec::new();
    for record in records {
        for name in record.categories() {
            if !categories.contains(&name) {
                categories.push(name);
            }
        }
    }

    let dates: Vec<i32> = records
        .iter()
        .map(|r| r.date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .collect();

    let mut columns = Vec::with_capacity(categories.len() + 1);
    columns.push(
        Column::new(DATE_COLUMN.into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
    );
    for name in categories {
        let values: Vec<Option<u64>> = records
            .iter()
            .map(|r| r.volumes.iter().find(|(n, _)| n == name).map(|(_, v)| *v))
            .collect();
        columns.push(Column::new(name.into(), values));
    }

    DataFrame::new(columns).map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load one part and check it has rows and a Date column.
fn load_part(path: &Path) -> Result<Vec<VolumeRecord>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::StoreError("empty parquet part".into()));
    }
    dataframe_to_records(&df)
}

/// Convert a DataFrame back to records.
fn dataframe_to_records(df: &DataFrame) -> Result<Vec<VolumeRecord>, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let date_ca = df
        .column(DATE_COLUMN)
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::ParquetError(format!("date column type: {e}")))?;

    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .filter(|n| n != DATE_COLUMN)
        .collect();
    let mut category_cols = Vec::with_capacity(names.len());
    for name in &names {
        let ca = df
            .column(name)
            .map_err(map_err)?
            .u64()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
        category_cols.push((name.as_str(), ca));
    }

    let n = df.height();
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        let date = NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
            .ok_or_else(|| DataError::ParquetError(format!("date out of range at row {i}")))?;
        let volumes = category_cols
            .iter()
            .filter_map(|(name, ca)| ca.get(i).map(|v| (name.to_string(), v)))
            .collect();
        records.push(VolumeRecord::new(date, volumes));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogLevel, MemoryLog};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn rec(date: NaiveDate, total: u64) -> VolumeRecord {
        VolumeRecord::new(
            date,
            vec![("Equity".into(), total - 1), ("OCC Total".into(), total)],
        )
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("volHist").is_ok());
        assert!(validate_identifier("Table_Name_123").is_ok());
        for bad in ["", "table-name", "table.name", "table name", "t; DROP TABLE x;", "t'--"] {
            assert!(
                matches!(validate_identifier(bad), Err(DataError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn coverage_from_unsorted_records() {
        let records = vec![rec(d(2024, 3, 1), 5), rec(d(2024, 1, 2), 5)];
        assert_eq!(
            Coverage::from_records(&records),
            Coverage::Range {
                min: d(2024, 1, 2),
                max: d(2024, 3, 1)
            }
        );
        assert_eq!(Coverage::from_records(&[]), Coverage::Empty);
    }

    #[test]
    fn memory_store_skips_known_dates() {
        let mut store = MemoryStore::new("volHist");
        assert_eq!(store.append(&[rec(d(2024, 1, 2), 10)]).unwrap(), 1);
        assert_eq!(
            store
                .append(&[rec(d(2024, 1, 2), 99), rec(d(2024, 1, 3), 11)])
                .unwrap(),
            1
        );
        assert_eq!(store.append(&[rec(d(2024, 1, 3), 12)]).unwrap(), 0);

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get("OCC Total"), Some(10));
        assert_eq!(store.append_calls(), 2);
    }

    #[test]
    fn memory_store_rejects_bad_table() {
        let mut store = MemoryStore::new("bad-name");
        assert!(matches!(
            store.append(&[rec(d(2024, 1, 2), 10)]),
            Err(DataError::InvalidIdentifier(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn parquet_roundtrip_keeps_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new());
        let mut store = ParquetStore::new(dir.path(), "volHist", log);

        let written = store
            .append(&[rec(d(2024, 1, 3), 20), rec(d(2024, 1, 2), 10)])
            .unwrap();
        assert_eq!(written, 2);

        let loaded = store.read_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].date, d(2024, 1, 2));
        assert_eq!(loaded[0].get("Equity"), Some(9));
        let cats: Vec<&str> = loaded[1].categories().collect();
        assert_eq!(cats, vec!["Equity", "OCC Total"]);
    }

    #[test]
    fn parquet_missing_table_reads_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new());
        let store = ParquetStore::new(dir.path(), "volHist", log.clone());

        assert!(store.read_all().unwrap().is_empty());
        assert_eq!(store.coverage().unwrap(), Coverage::Empty);
        assert_eq!(log.count(LogLevel::Warning), 2);
    }

    #[test]
    fn parquet_invalid_table_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::new(dir.path(), "bad; DROP", Arc::new(MemoryLog::new()));

        let err = store.append(&[rec(d(2024, 1, 2), 10)]).unwrap_err();
        assert!(matches!(err, DataError::InvalidIdentifier(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(
            store.read_all(),
            Err(DataError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn parquet_reappend_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::new(dir.path(), "volHist", Arc::new(MemoryLog::new()));

        store.append(&[rec(d(2024, 1, 2), 10)]).unwrap();
        assert_eq!(store.append(&[rec(d(2024, 1, 2), 10)]).unwrap(), 0);
        assert_eq!(store.read_all().unwrap().len(), 1);
        assert_eq!(store.meta().unwrap().part_count, 1);
    }

    #[test]
    fn parquet_appends_read_existing_parts_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new());
        let mut store = ParquetStore::new(dir.path(), "volHist", log.clone());
        let reads = |log: &MemoryLog| {
            log.messages(LogLevel::Debug)
                .iter()
                .filter(|m| m.starts_with("Attempting to read"))
                .count()
        };

        for day in 1..=5 {
            store.append(&[rec(d(2024, 1, day), 10)]).unwrap();
        }
        assert_eq!(store.append(&[rec(d(2024, 1, 3), 10)]).unwrap(), 0);
        assert_eq!(reads(&log), 0);
        assert_eq!(store.meta().unwrap().row_count, 5);

        // A fresh handle on the same directory loads the parts once
        let mut reopened = ParquetStore::new(dir.path(), "volHist", log.clone());
        reopened.append(&[rec(d(2024, 1, 8), 10)]).unwrap();
        reopened.append(&[rec(d(2024, 1, 9), 10)]).unwrap();
        assert_eq!(reads(&log), 1);
        assert_eq!(reopened.read_all().unwrap().len(), 7);
        assert_eq!(reopened.meta().unwrap().row_count, 7);
    }

    #[test]
    fn parquet_parts_may_differ_in_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::new(dir.path(), "volHist", Arc::new(MemoryLog::new()));

        store
            .append(&[VolumeRecord::new(d(2008, 2, 1), vec![("Equity".into(), 1)])])
            .unwrap();
        store.append(&[rec(d(2024, 1, 2), 10)]).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all[0].volumes, vec![("Equity".to_string(), 1)]);
        assert_eq!(all[1].get("OCC Total"), Some(10));
    }

    #[test]
    fn parquet_meta_tracks_range_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::new(dir.path(), "volHist", Arc::new(MemoryLog::new()));

        store.append(&[rec(d(2024, 2, 1), 10)]).unwrap();
        store.append(&[rec(d(2024, 1, 2), 10)]).unwrap();

        let meta = store.meta().unwrap();
        assert_eq!(meta.start_date, d(2024, 1, 2));
        assert_eq!(meta.end_date, d(2024, 2, 1));
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.part_count, 2);
        assert_eq!(meta.data_hash.len(), 64);
    }

    #[test]
    fn corrupt_part_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryLog::new());
        let mut store = ParquetStore::new(dir.path(), "volHist", log.clone());
        store.append(&[rec(d(2024, 1, 2), 10)]).unwrap();

        let bogus = store.table_dir().join("part-20240201-20240229.parquet");
        fs::write(&bogus, b"not parquet").unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(!bogus.exists());
        assert!(bogus.with_extension("parquet.quarantined").exists());
        assert!(log
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("quarantining")));
    }
}
