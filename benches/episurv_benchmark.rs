use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use episurv::prelude::*;
use std::fmt::Write as _;
use std::hint::black_box;
use std::sync::OnceLock;

const FACILITIES: usize = 400;
const WEEKS: usize = 52;

// Static storage for the synthetic snapshot to avoid rebuilding for each benchmark
static SNAPSHOT: OnceLock<Snapshot> = OnceLock::new();

fn facility_code(i: usize) -> String {
    format!("{:06}{}{:03}", 150100 + i % 60, (b'A' + (i % 26) as u8) as char, i % 1000)
}

fn roster_csv() -> String {
    let mut text = String::from("renaes;raz_soc;ris;ubigeo\n");
    for i in 0..FACILITIES {
        let code = facility_code(i);
        writeln!(text, "{};Establecimiento {};{:02} RIS {};{}", code, i, i % 7, i % 7, &code[..6]).unwrap();
    }
    text
}

fn iras_csv() -> String {
    let mut text = String::from("ano;semana;renaes;ira_m2;ira_2a11;neu_m2;neu_2a11;sob_2a4\n");
    for week in 1..=WEEKS {
        for i in 0..FACILITIES {
            writeln!(
                text,
                "2024;{};{};{};{};{};{};{}",
                week,
                facility_code(i),
                i % 5,
                week % 3,
                i % 2,
                week % 2,
                (i + week) % 4
            )
            .unwrap();
        }
    }
    text
}

fn get_snapshot() -> &'static Snapshot {
    SNAPSHOT.get_or_init(|| {
        let reader = SourceReader::new();
        let iras = reader.parse_bytes(iras_csv().as_bytes()).expect("synthetic iras parse");
        let roster = reader.parse_bytes(roster_csv().as_bytes()).expect("synthetic roster parse");
        Snapshot::from_tables(iras, SourceTable::empty(), SourceTable::empty(), roster)
    })
}

fn benchmark_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("facility_code");

    for (name, raw) in [
        ("clean", "150140D101"),
        ("noisy", "EESS: 150140-d-101 (C.S. ALFA)"),
        ("no_match", "CENTRO DE SALUD SAN JUAN"),
    ] {
        group.bench_with_input(BenchmarkId::new("normalize", name), raw, |b, raw| {
            b.iter(|| FacilityCode::normalize(black_box(raw)))
        });
    }

    group.finish();
}

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    group.sample_size(20);

    let iras = iras_csv();
    group.bench_function("parse_iras_20k_rows", |b| {
        let reader = SourceReader::new();
        b.iter(|| reader.parse_bytes(black_box(iras.as_bytes())).unwrap())
    });

    let roster = reader_table(&roster_csv());
    group.bench_function("build_roster_index", |b| {
        b.iter(|| RosterIndex::build(black_box(&roster)))
    });

    group.finish();
}

fn reader_table(text: &str) -> SourceTable {
    SourceReader::new().parse_bytes(text.as_bytes()).unwrap()
}

fn benchmark_aggregation(c: &mut Criterion) {
    let snapshot = get_snapshot();
    let analytics = snapshot.analytics();
    let mut group = c.benchmark_group("aggregation");

    for group_by in [GroupBy::Facility, GroupBy::Region] {
        let query = PivotQuery::new(2024, Indicator::Ira).group_by(group_by);
        group.bench_with_input(BenchmarkId::new("pivot_full_year", group_by), &query, |b, query| {
            b.iter(|| analytics.pivot(black_box(query)))
        });
    }

    let summary = SummaryQuery::new(2024, 26);
    group.bench_function("summary_week", |b| {
        b.iter(|| analytics.summary(black_box(&summary)).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_normalization,
    benchmark_parsing,
    benchmark_aggregation
);
criterion_main!(benches);
