//! occvol core: monthly options volume reports, parsed and kept in a local store.
//!
//! - Report source trait with a blocking HTTP implementation
//! - Dual-table report parser covering both historical layouts
//! - Record builder and an append-only Parquet store
//! - Reconciler that backfills toward the earliest published month and fills
//!   forward through the most recently elapsed one

pub mod config;
pub mod data;
pub mod log;
pub mod month;
pub mod rank;
pub mod reconcile;
pub mod synthetic;

pub use config::{Config, ConfigError};
pub use log::{LogLevel, MemoryLog, RunLog, TracingLog};
pub use month::MonthCursor;
pub use rank::{top_n, OCC_TOTAL};
pub use reconcile::{ReconcileSummary, Reconciler, EARLIEST_AVAILABLE_MONTH};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared with the CLI are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::VolumeRecord>();
        require_sync::<data::VolumeRecord>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();
        require_send::<data::ParsedTables>();
        require_sync::<data::ParsedTables>();
        require_send::<data::OccReportSource>();
        require_sync::<data::OccReportSource>();
        require_send::<data::ParquetStore>();
        require_sync::<data::ParquetStore>();
        require_send::<data::MemoryStore>();
        require_sync::<data::MemoryStore>();
        require_send::<ReconcileSummary>();
        require_sync::<ReconcileSummary>();
        require_send::<Config>();
        require_sync::<Config>();
        require_send::<MemoryLog>();
        require_sync::<MemoryLog>();
    }

    /// The reconciler only sees trait objects, so any source and store can drive it.
    #[test]
    fn reconciler_accepts_trait_objects() {
        fn _build<'a>(
            source: &'a dyn data::ReportSource,
            store: &'a mut dyn data::VolumeStore,
            log: &'a dyn RunLog,
        ) -> Reconciler<'a> {
            Reconciler::new(source, store, log)
        }
    }
}
