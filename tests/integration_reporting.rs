/*!
 * End-to-end tests: messy source files on disk through pivot, summary and
 * the persisted notification report
 */

use std::fs;
use std::path::Path;

use episurv::cookbook::write_weekly_report;
use episurv::prelude::*;
use tempfile::TempDir;

fn seed_sources(dir: &Path) {
    // roster: BOM, padded headers, one duplicate code and one row without code
    fs::write(
        dir.join("eess_maestro.csv"),
        "\u{feff} RENAES ;Raz_Soc;RIS;ubigeo\n\
         150140D101;C.S. Alfa;01 RIS NORTE;150140\n\
         150140D102;P.S. Beta;01 RIS NORTE;150140\n\
         150141D201;C.S. Gamma;02 RIS SUR;150141\n\
         150141D201;C.S. Gamma II;02 RIS SUR;150141\n\
         ;Sin codigo;02 RIS SUR;150141\n",
    )
    .unwrap();

    // comma separated, code buried in free text, short line padded
    fs::write(
        dir.join("iras.csv"),
        "ano,semana,establecimiento,ira_m2,neu_m2\n\
         2024,10,EESS 150140-d101 ALFA,4,1\n\
         2024,10,150141D201,2\n\
         2024,11,150140D101,1,0\n",
    )
    .unwrap();

    fs::write(
        dir.join("edas.csv"),
        "anio;se;e_salud;daa_m1;dis_m1\n\
         2024;10;150140D102;0;0\n",
    )
    .unwrap();
    // febriles.csv deliberately missing
}

#[test]
fn test_pivot_and_summary_from_disk() {
    let dir = TempDir::new().unwrap();
    seed_sources(dir.path());

    let cache = SnapshotCache::new(SourceLocator::fixed(dir.path()));
    let snapshot = cache.get_snapshot();
    assert!(snapshot.febrile.is_empty());
    assert_eq!(snapshot.roster.len(), 3);
    assert_eq!(snapshot.roster.skipped_rows(), 1);

    let analytics = snapshot.analytics();
    let pivot = analytics.pivot(
        &PivotQuery::from_params(2024, "IRA", "ris", 10, 11, None).unwrap(),
    );
    let series: Vec<(&str, &[i64])> = pivot
        .rows
        .iter()
        .map(|s| (s.label.as_str(), s.values.as_slice()))
        .collect();
    assert_eq!(series, vec![("RIS NORTE", &[4, 1][..]), ("RIS SUR", &[2, 0][..])]);
    assert_eq!(pivot.total_row.values, vec![6, 1]);

    let summary = analytics.summary(&SummaryQuery::new(2024, 10)).unwrap();
    let names: Vec<&str> = summary.rows.iter().map(|r| r.name.as_str()).collect();
    // the later roster row wins for the repeated code
    assert_eq!(names, vec!["C.S. Alfa", "P.S. Beta", "C.S. Gamma II"]);
    assert_eq!(summary.notified_count, 2);
    assert_eq!(summary.non_notified_count, 1);
    assert_eq!(summary.totals.ira, 6);
    assert_eq!(summary.totals.pneumonia, 1);
}

#[test]
fn test_roster_diagnostics() {
    let dir = TempDir::new().unwrap();
    seed_sources(dir.path());

    let snapshot = Snapshot::load_directory(dir.path());
    let analytics = snapshot.analytics();

    assert_eq!(analytics.region_options(), vec!["RIS NORTE", "RIS SUR"]);
    let issues = analytics.roster_issues();
    assert_eq!(issues.empty, 1);
    assert_eq!(issues.duplicates.len(), 1);
    assert_eq!(issues.duplicates[0].code.as_str(), "150141D201");
    assert_eq!(issues.duplicates[0].count, 2);
}

#[test]
fn test_weekly_report_written_to_configured_path() {
    let seed = TempDir::new().unwrap();
    let uploads = TempDir::new().unwrap();
    seed_sources(seed.path());

    let config = ConfigBuilder::new()
        .uploads_dir(uploads.path())
        .seed_dir(seed.path())
        .build();
    let cache = SnapshotCache::from_config(&config);

    let path = write_weekly_report(&cache, &config, 2024, 10, Some("RIS NORTE")).unwrap();
    assert_eq!(path, uploads.path().join("tablas_notificante.csv"));

    let bytes = fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "SEMANA EPIDEMIOLÓGICA 10;AÑO 2024;UBIGEO ;RIS RIS NORTE");
    assert_eq!(lines[1], "ESTABLECIMIENTOS NOTIFICADOS;1");
    assert_eq!(lines[2], "ESTABLECIMIENTOS NO NOTIFICADOS;1");
    assert_eq!(lines[5], "RIS NORTE;C.S. Alfa;150140D101;4;1;0;0;0;0;");
    assert_eq!(lines[6], "RIS NORTE;P.S. Beta;150140D102;0;0;0;0;0;0;");
}

#[test]
fn test_consolidated_report_to_json() {
    let dir = TempDir::new().unwrap();
    seed_sources(dir.path());
    let snapshot = Snapshot::load_directory(dir.path());

    let request: ReportRequest = serde_json::from_str(
        r#"{
            "year": 2024,
            "week": 10,
            "area_code": "15014",
            "rows": [
                {"code": "150141-d201", "febrile": 2},
                {"code": "150140D101", "ira": 1, "dysentery": 1}
            ]
        }"#,
    )
    .unwrap();
    let report = snapshot.analytics().notification_report(&request).unwrap();
    assert_eq!(report.total_facilities, 3);
    assert_eq!(report.notified_count, 2);

    let out = dir.path().join("reports").join("semana10.json");
    report.export(&out, ExportFormat::Json).unwrap();
    let parsed: NotificationReport =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(parsed, report);
}
