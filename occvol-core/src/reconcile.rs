//! Store reconciliation: backfill toward the earliest published month, then
//! fill forward through the most recently elapsed month.
//!
//! Each run recomputes coverage from the store, so an interrupted run is
//! resumed by the next one. Months are fetched one at a time in strict cursor
//! order and each target month is attempted at most once per run.
//!
//! Failure policy per month is decided by [`DataError::disposition`]:
//! transport faults and unavailable months are logged and skipped, anything
//! structural aborts the run with the store left as it was at that point.

use crate::data::provider::{DataError, Disposition, ReportSource};
use crate::data::records::build_records;
use crate::data::report::parse_report;
use crate::data::store::{Coverage, VolumeStore};
use crate::log::RunLog;
use crate::month::{most_recently_elapsed, Direction, MonthCursor, MonthWalk};
use chrono::NaiveDate;

/// The publisher has nothing before this month.
pub const EARLIEST_AVAILABLE_MONTH: NaiveDate = match NaiveDate::from_ymd_opt(2008, 1, 1) {
    Some(date) => date,
    None => panic!("invalid earliest month"),
};

/// Lifecycle of one direction of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// Coverage not read yet.
    Unknown,
    /// Cursor is walking toward the bound.
    Filling,
    /// Cursor crossed the bound.
    Complete,
    /// Nothing to do in this direction.
    Skipped,
}

/// What happened to one target month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthOutcome {
    Appended { month: NaiveDate, rows: usize },
    Skipped { month: NaiveDate, reason: String },
}

impl MonthOutcome {
    pub fn month(&self) -> NaiveDate {
        match self {
            MonthOutcome::Appended { month, .. } | MonthOutcome::Skipped { month, .. } => *month,
        }
    }
}

/// Tally for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub direction: Direction,
    pub state: PhaseState,
    pub attempted: usize,
    pub appended: usize,
    pub rows_written: usize,
    pub skipped: Vec<(NaiveDate, String)>,
}

impl PhaseReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: PhaseState::Unknown,
            attempted: 0,
            appended: 0,
            rows_written: 0,
            skipped: Vec::new(),
        }
    }

    fn record(&mut self, outcome: MonthOutcome) {
        self.attempted += 1;
        match outcome {
            MonthOutcome::Appended { rows, .. } => {
                self.appended += 1;
                self.rows_written += rows;
            }
            MonthOutcome::Skipped { month, reason } => self.skipped.push((month, reason)),
        }
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub today: NaiveDate,
    pub prev_month: NaiveDate,
    pub coverage_before: Coverage,
    /// Set only when the store was empty at the start of the run.
    pub bootstrap: Option<MonthOutcome>,
    pub backward: PhaseReport,
    pub forward: PhaseReport,
}

impl ReconcileSummary {
    /// Months fetched this run, bootstrap included.
    pub fn attempted(&self) -> usize {
        usize::from(self.bootstrap.is_some()) + self.backward.attempted + self.forward.attempted
    }

    pub fn rows_written(&self) -> usize {
        let bootstrap = match &self.bootstrap {
            Some(MonthOutcome::Appended { rows, .. }) => *rows,
            _ => 0,
        };
        bootstrap + self.backward.rows_written + self.forward.rows_written
    }

    /// Every skipped month with its reason, in the order they were attempted.
    pub fn skipped(&self) -> Vec<(NaiveDate, String)> {
        let mut all = Vec::new();
        if let Some(MonthOutcome::Skipped { month, reason }) = &self.bootstrap {
            all.push((*month, reason.clone()));
        }
        all.extend(self.backward.skipped.iter().cloned());
        all.extend(self.forward.skipped.iter().cloned());
        all
    }
}

/// Drives one source into one store.
pub struct Reconciler<'a> {
    source: &'a dyn ReportSource,
    store: &'a mut dyn VolumeStore,
    log: &'a dyn RunLog,
    earliest: MonthCursor,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        source: &'a dyn ReportSource,
        store: &'a mut dyn VolumeStore,
        log: &'a dyn RunLog,
    ) -> Self {
        Self {
            source,
            store,
            log,
            earliest: MonthCursor::of(EARLIEST_AVAILABLE_MONTH),
        }
    }

    /// Override the backfill floor (the floor month itself is never fetched).
    pub fn with_earliest(mut self, earliest: NaiveDate) -> Self {
        self.earliest = MonthCursor::of(earliest);
        self
    }

    /// Bring the store up to date as of `today`.
    pub fn run(&mut self, today: NaiveDate) -> Result<ReconcileSummary, DataError> {
        let prev_month = most_recently_elapsed(today);
        let coverage = self.store.coverage()?;
        let mut summary = ReconcileSummary {
            today,
            prev_month: prev_month.first_day(),
            coverage_before: coverage,
            bootstrap: None,
            backward: PhaseReport::new(Direction::Backward),
            forward: PhaseReport::new(Direction::Forward),
        };

        let (min, max) = match coverage {
            Coverage::Empty if prev_month <= self.earliest => {
                self.log.info(&format!(
                    "{} is empty and {prev_month} is not after {}, nothing to fetch",
                    self.store.table(),
                    self.earliest
                ));
                summary.backward.state = PhaseState::Skipped;
                summary.forward.state = PhaseState::Skipped;
                return Ok(summary);
            }
            Coverage::Empty => {
                self.log.info(&format!(
                    "{} is empty, starting from {prev_month}",
                    self.store.table()
                ));
                summary.bootstrap = Some(self.ingest(prev_month)?);
                (prev_month, None)
            }
            Coverage::Range { min, max } => {
                self.log.info(&format!(
                    "{} holds {min} through {max}",
                    self.store.table()
                ));
                (MonthCursor::of(min), Some(MonthCursor::of(max)))
            }
        };

        if min > self.earliest {
            self.log.info(&format!(
                "Backfilling from {} back to {}",
                min.prev(),
                self.earliest
            ));
            let walk = min.prev().walk_back_to(self.earliest);
            self.run_phase(walk, &mut summary.backward)?;
        } else {
            self.log.info("Backfill not needed");
            summary.backward.state = PhaseState::Skipped;
        }

        match max {
            Some(max) if max <= prev_month => {
                self.log.info(&format!(
                    "Filling from {} through {prev_month}",
                    max.next()
                ));
                let walk = max.next().walk_forward_through(prev_month);
                self.run_phase(walk, &mut summary.forward)?;
            }
            _ => {
                self.log.info("Forward fill not needed");
                summary.forward.state = PhaseState::Skipped;
            }
        }

        self.log.info(&format!(
            "Reconcile finished: {} months attempted, {} rows written, {} skipped",
            summary.attempted(),
            summary.rows_written(),
            summary.skipped().len()
        ));
        Ok(summary)
    }

    fn run_phase(&mut self, walk: MonthWalk, report: &mut PhaseReport) -> Result<(), DataError> {
        report.state = PhaseState::Filling;
        for month in walk {
            let outcome = self.ingest(month)?;
            report.record(outcome);
        }
        report.state = PhaseState::Complete;
        Ok(())
    }

    /// Fetch, parse, build and append one month, applying the skip policy.
    fn ingest(&mut self, month: MonthCursor) -> Result<MonthOutcome, DataError> {
        self.log.info(&format!("Ingesting data for {month}"));
        match self.fetch_and_append(month) {
            Ok(rows) => Ok(MonthOutcome::Appended {
                month: month.first_day(),
                rows,
            }),
            Err(e) => match e.disposition() {
                Disposition::Skip => {
                    self.log.warning(&format!("Skipping {month}: {e}"));
                    Ok(MonthOutcome::Skipped {
                        month: month.first_day(),
                        reason: e.to_string(),
                    })
                }
                Disposition::Abort => {
                    self.log.error(&format!("Stopping at {month}: {e}"));
                    Err(e)
                }
            },
        }
    }

    fn fetch_and_append(&mut self, month: MonthCursor) -> Result<usize, DataError> {
        let raw = self.source.fetch(month.first_day())?;
        let tables = parse_report(&raw.text)?;
        let records = build_records(&tables, None)?;
        self.store.append(&records)
    }
}
