//! Report ingestion and storage

pub mod occ;
pub mod provider;
pub mod records;
pub mod report;
pub mod store;

pub use occ::OccReportSource;
pub use provider::{
    DataError, Disposition, RawReport, ReportSource, TransportKind, UnavailableKind, VolumeRecord,
};
pub use records::{build_records, merge_records};
pub use report::{parse_report, ParsedTables, ReportLayout, ReportTable};
pub use store::{Coverage, MemoryStore, ParquetStore, StoreMeta, VolumeStore};
