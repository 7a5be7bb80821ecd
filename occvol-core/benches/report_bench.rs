//! Criterion benchmarks for the ingest hot paths.
//!
//! Benchmarks:
//! 1. Report parsing (both layouts)
//! 2. Record building from parsed tables
//! 3. Merging a month into a multi-year history
//! 4. Top-N selection over a multi-year history

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use occvol_core::data::{build_records, merge_records, parse_report, ReportLayout, VolumeRecord};
use occvol_core::month::MonthCursor;
use occvol_core::rank::{top_n, OCC_TOTAL};
use occvol_core::synthetic::{layout_for, synthetic_report};

// ── Helpers ──────────────────────────────────────────────────────────

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn history(years: i32) -> Vec<VolumeRecord> {
    let first = MonthCursor::of(month(2024 - years, 1));
    let last = MonthCursor::of(month(2023, 12));
    first
        .walk_forward_through(last)
        .flat_map(|m| {
            let raw = synthetic_report(m.first_day(), layout_for(m.first_day()));
            build_records(&parse_report(&raw).unwrap(), None).unwrap()
        })
        .collect()
}

// ── 1. Parsing ───────────────────────────────────────────────────────

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_report");

    for (name, layout) in [
        ("sectioned", ReportLayout::Sectioned),
        ("blank_separated", ReportLayout::BlankSeparated),
    ] {
        let raw = synthetic_report(month(2024, 3), layout);
        group.bench_with_input(BenchmarkId::new("one_month", name), &raw, |b, raw| {
            b.iter(|| parse_report(black_box(raw)))
        });
    }

    group.finish();
}

// ── 2. Building ──────────────────────────────────────────────────────

fn bench_build(c: &mut Criterion) {
    let raw = synthetic_report(month(2024, 3), ReportLayout::BlankSeparated);
    let tables = parse_report(&raw).unwrap();

    c.bench_function("build_records/one_month", |b| {
        b.iter(|| build_records(black_box(&tables), None))
    });
}

// ── 3. Merging ───────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_records");
    let raw = synthetic_report(month(2024, 3), ReportLayout::BlankSeparated);
    let incoming = build_records(&parse_report(&raw).unwrap(), None).unwrap();

    for years in [1, 5, 15] {
        let existing = history(years);
        group.bench_with_input(BenchmarkId::new("years", years), &existing, |b, existing| {
            b.iter(|| merge_records(black_box(existing), incoming.clone()))
        });
    }

    group.finish();
}

// ── 4. Ranking ───────────────────────────────────────────────────────

fn bench_top_n(c: &mut Criterion) {
    let records = history(15);
    c.bench_function("top_n/15_years", |b| {
        b.iter(|| top_n(black_box(&records), OCC_TOTAL, 10).len())
    });
}

criterion_group!(benches, bench_parse, bench_build, bench_merge, bench_top_n);
criterion_main!(benches);
