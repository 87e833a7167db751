/*!
 * # Epidemiological Surveillance Aggregation Library
 *
 * Reconciles the weekly notification exports of a regional health network
 * (acute respiratory infections, acute diarrheal disease, febrile syndromes)
 * against the facility master roster and aggregates them for dashboards and
 * the weekly notification report.
 *
 * ## Features
 *
 * - **Tolerant parsing**: comma or semicolon files, ragged lines, inconsistent headers
 * - **Facility code recovery**: canonical `DDDDDD` + letter + `DDD` codes pulled out of noisy text
 * - **Snapshot cache**: sources are re-read only when a file actually changes
 * - **Weekly pivot and summary**: per facility or per region, with grand totals
 * - **Report export**: the semicolon table used by the regional offices, or JSON
 *
 * ## Quick Start
 *
 * ```no_run
 * use episurv::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let cache = SnapshotCache::new(SourceLocator::fixed("./data"));
 * let snapshot = cache.get_snapshot();
 * let analytics = snapshot.analytics();
 *
 * // Weekly IRA counts per facility for the first quarter
 * let pivot = analytics.pivot(&PivotQuery::new(2024, Indicator::Ira).weeks(1, 13));
 * for series in &pivot.rows {
 *     println!("{}: {}", series.label, series.total);
 * }
 *
 * // Who notified in week 10
 * let summary = analytics.summary(&SummaryQuery::new(2024, 10).region("RIS NORTE"))?;
 * println!("{} notified, {} did not", summary.notified_count, summary.non_notified_count);
 * # Ok(())
 * # }
 * ```
 *
 * ## Source Files
 *
 * All sources live in one directory under fixed names:
 *
 * - `iras.csv`: acute respiratory infections, pneumonia, wheezing/asthma
 * - `edas.csv`: aqueous and dysenteric diarrhea
 * - `febriles.csv`: febrile syndromes
 * - `eess_maestro.csv`: facility master roster
 * - `individual.csv`: individual notifications (accepted, not aggregated)
 *
 * A missing file is treated as an empty table.
 *
 * ## Configuration
 *
 * ```no_run
 * # use episurv::prelude::*;
 * let config = ConfigBuilder::new()
 *     .uploads_dir("/srv/epi/uploads")
 *     .seed_dir("/srv/epi/seed")
 *     .build();
 * let cache = SnapshotCache::from_config(&config);
 * episurv::config::set_global_config(config);
 * ```
 */

// Re-export error types from root
pub use error::{EpiError, Result, ErrorContext, ExportFormat};

// Public modules
pub mod data_types;
pub mod reader;
pub mod schema;
pub mod error;
pub mod roster;
pub mod analytics;
pub mod dataset;
pub mod export;
pub mod config;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use episurv::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::reader::{Row, SourceReader, SourceTable};
    pub use crate::schema::SurveillanceRow;
    pub use crate::error::{EpiError, Result};
    pub use crate::roster::{RosterIndex, RosterIssues, DuplicateCode};
    pub use crate::analytics::{
        EpiAnalytics, PivotQuery, PivotResult, PivotSeries, SummaryQuery, SummaryResult,
        FacilitySummary, ReportRequest, NotificationReport,
    };
    pub use crate::dataset::{
        Snapshot, SnapshotBuilder, SnapshotCache, SnapshotStatistics, SourceLocator, SourceStamps,
    };
    pub use crate::export::{ReportExporter, CsvReportExporter, JsonReportExporter};
    pub use crate::config::{ConfigBuilder, EpiConfig};
    pub use crate::ExportFormat;
}

/// Source file and report constants
pub mod constants {
    /// Acute respiratory infection notifications
    pub const IRA_FILE: &str = "iras.csv";

    /// Acute diarrheal disease notifications
    pub const EDA_FILE: &str = "edas.csv";

    /// Febrile syndrome notifications
    pub const FEBRILE_FILE: &str = "febriles.csv";

    /// Facility master roster
    pub const ROSTER_FILE: &str = "eess_maestro.csv";

    /// Individual notifications
    pub const INDIVIDUAL_FILE: &str = "individual.csv";

    /// Default name of the generated weekly report
    pub const REPORT_FILE: &str = "tablas_notificante.csv";
}

/// Common recipes
pub mod cookbook {
    use crate::prelude::*;

    /// Summarize one week and shape it as a notification report
    ///
    /// # Example
    /// ```no_run
    /// # use episurv::prelude::*;
    /// # use episurv::cookbook::weekly_report;
    /// # fn main() -> Result<()> {
    /// let cache = SnapshotCache::new(SourceLocator::fixed("./data"));
    /// let report = weekly_report(&cache, 2024, 10, Some("RIS NORTE"))?;
    /// println!("{}", report.to_csv_string()?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn weekly_report(
        cache: &SnapshotCache,
        year: i32,
        week: i32,
        region: Option<&str>,
    ) -> Result<NotificationReport> {
        let snapshot = cache.get_snapshot();
        let mut query = SummaryQuery::new(year, week);
        if let Some(region) = region {
            query = query.region(region);
        }
        let summary = snapshot.analytics().summary(&query)?;
        Ok(NotificationReport::from(&summary))
    }

    /// Build the report and write it to the configured report path
    pub fn write_weekly_report(
        cache: &SnapshotCache,
        config: &EpiConfig,
        year: i32,
        week: i32,
        region: Option<&str>,
    ) -> Result<std::path::PathBuf> {
        let report = weekly_report(cache, year, week, region)?;
        let path = config.report_path();
        report.export(&path, config.report_format)?;
        Ok(path)
    }
}
