/*!
 * Aggregation engine over a source snapshot
 *
 * Two queries drive the dashboards: the weekly pivot (one indicator, one
 * series per facility or region, one column per epidemiological week) and the
 * per-facility summary of a single week. The notification report reshapes
 * either a summary or client-consolidated rows into the layout the report
 * writer persists.
 */

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::data_types::*;
use crate::dataset::{Snapshot, SnapshotStatistics};
use crate::roster::{roster_issues, RosterIssues};
use crate::schema::SurveillanceRow;
use crate::{EpiError, Result};

/// Label of the synthetic per-week total row
pub const TOTAL_LABEL: &str = "TOTAL";

/// Series label for rows whose facility has no known region
pub const UNKNOWN_REGION_LABEL: &str = "SIN RED";

/// Analytics engine for one snapshot
pub struct EpiAnalytics<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> EpiAnalytics<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot }
    }

    /// Weekly pivot of one indicator
    pub fn pivot(&self, query: &PivotQuery) -> PivotResult {
        let table = match self.snapshot.table(query.indicator.source()) {
            Some(table) => table,
            None => return PivotResult::empty(query),
        };
        let roster = &self.snapshot.roster;
        let weeks = query.weeks;

        let mut series: Vec<SeriesAccumulator> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut matched_rows = 0usize;

        for row in table {
            if row.year() != Some(query.year) {
                continue;
            }
            let Some(slot) = row.week().and_then(|week| weeks.offset(week)) else {
                continue;
            };
            let Some(code) = row.facility_code() else {
                continue;
            };

            let entry = roster.get(&code);
            let region = entry.and_then(|e| e.region.as_deref());
            if let Some(wanted) = query.region.as_deref() {
                if !entry.is_some_and(|e| e.in_region(wanted)) {
                    continue;
                }
            }

            let label = match query.group_by {
                GroupBy::Region => region.unwrap_or(UNKNOWN_REGION_LABEL).to_string(),
                GroupBy::Facility => entry
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| code.to_string()),
            };

            let position = *index.entry(label.to_lowercase()).or_insert_with(|| {
                series.push(SeriesAccumulator {
                    code: (query.group_by == GroupBy::Facility).then(|| code.clone()),
                    label,
                    values: vec![0.0; weeks.len()],
                });
                series.len() - 1
            });
            series[position].values[slot] += row.indicator_value(query.indicator);
            matched_rows += 1;
        }

        let mut rows: Vec<PivotSeries> = series.into_iter().map(SeriesAccumulator::finish).collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total));

        let mut column_totals = vec![0i64; weeks.len()];
        for series in &rows {
            for (total, value) in column_totals.iter_mut().zip(&series.values) {
                *total += value;
            }
        }
        let total_row = PivotSeries {
            label: TOTAL_LABEL.to_string(),
            code: None,
            total: column_totals.iter().sum(),
            values: column_totals,
        };

        debug!(
            indicator = %query.indicator,
            group_by = %query.group_by,
            matched_rows,
            series = rows.len(),
            "computed weekly pivot"
        );

        PivotResult {
            indicator: query.indicator,
            group_by: query.group_by,
            weeks: weeks.weeks().collect(),
            rows,
            total_row,
        }
    }

    /// Per-facility counts for one week.
    ///
    /// An unexpected fault anywhere in the computation is reported as a single
    /// [`EpiError::Aggregation`]; no partial result is returned.
    pub fn summary(&self, query: &SummaryQuery) -> Result<SummaryResult> {
        query.validate()?;
        guard_aggregation("summary", || self.compute_summary(query))
    }

    fn compute_summary(&self, query: &SummaryQuery) -> SummaryResult {
        let roster = &self.snapshot.roster;
        let region = query.region.as_deref();
        let passes = |entry: &RosterEntry| region.map_or(true, |r| entry.in_region(r));

        // every facility with at least one row in the period, zero counts included
        let mut reported: HashMap<FacilityCode, [f64; 6]> = HashMap::new();
        for (kind, table) in self.snapshot.clinical_tables() {
            for row in table {
                if !row.is_period(query.year, query.week) {
                    continue;
                }
                let Some(code) = row.facility_code() else {
                    continue;
                };
                let sums = reported.entry(code).or_insert([0.0; 6]);
                for (slot, category) in Category::ALL.iter().enumerate() {
                    if category.source() == kind {
                        sums[slot] += row.category_value(*category);
                    }
                }
            }
        }

        let mut universe: BTreeSet<FacilityCode> = BTreeSet::new();
        if query.include_all {
            universe.extend(roster.iter().filter(|e| passes(*e)).map(|e| e.code.clone()));
        }
        for code in reported.keys() {
            let keep = match roster.get(code) {
                Some(entry) => passes(entry),
                // unreconciled facilities stay visible unless a region is requested
                None => region.is_none(),
            };
            if keep {
                universe.insert(code.clone());
            }
        }

        let mut rows: Vec<FacilitySummary> = universe
            .into_iter()
            .map(|code| {
                let sums = reported.get(&code).copied().unwrap_or([0.0; 6]);
                let mut counts = CategoryCounts::default();
                for (slot, category) in Category::ALL.iter().enumerate() {
                    *counts.get_mut(*category) = sums[slot] as i64;
                }
                let entry = roster.get(&code);
                FacilitySummary {
                    name: entry.map_or_else(|| code.to_string(), |e| e.name.clone()),
                    region: entry.and_then(|e| e.region.clone()),
                    area_code: entry
                        .and_then(|e| e.area_code.clone())
                        .or_else(|| Some(code.area_prefix().to_string())),
                    notified: sums.iter().sum::<f64>() > 0.0,
                    counts,
                    code,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            a.region
                .as_deref()
                .unwrap_or("")
                .cmp(b.region.as_deref().unwrap_or(""))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.code.cmp(&b.code))
        });

        let mut totals = CategoryCounts::default();
        let mut notified_count = 0;
        for row in &rows {
            totals += row.counts;
            if row.notified {
                notified_count += 1;
            }
        }

        debug!(
            year = query.year,
            week = query.week,
            facilities = rows.len(),
            notified_count,
            "computed weekly summary"
        );

        SummaryResult {
            year: query.year,
            week: query.week,
            region: query.region.clone(),
            include_all: query.include_all,
            notified_count,
            non_notified_count: rows.len() - notified_count,
            totals,
            rows,
        }
    }

    /// Build the weekly notification report from client-consolidated rows.
    ///
    /// Consolidated rows are grouped by normalized code (raw trimmed text when
    /// the code does not normalize). One report row is emitted per roster
    /// facility that passes the area-code and region filters.
    pub fn notification_report(&self, request: &ReportRequest) -> Result<NotificationReport> {
        request.validate()?;

        let mut consolidated: HashMap<String, CategoryCounts> = HashMap::new();
        for row in &request.rows {
            let raw = row.code.trim();
            let key = FacilityCode::normalize(raw)
                .map(String::from)
                .unwrap_or_else(|_| raw.to_uppercase());
            *consolidated.entry(key).or_default() += row.counts;
        }

        let area_code = non_blank(request.area_code.as_deref());
        let region = non_blank(request.region.as_deref());

        let mut facilities: Vec<&RosterEntry> = self
            .snapshot
            .roster
            .iter()
            .filter(|entry| {
                area_code.map_or(true, |prefix| {
                    entry
                        .area_code
                        .as_deref()
                        .is_some_and(|area| area.starts_with(prefix))
                })
            })
            .filter(|entry| region.map_or(true, |r| entry.in_region(r)))
            .collect();
        facilities.sort_by(|a, b| {
            a.region
                .as_deref()
                .unwrap_or("")
                .cmp(b.region.as_deref().unwrap_or(""))
                .then_with(|| a.name.cmp(&b.name))
        });

        let rows: Vec<ReportRow> = facilities
            .into_iter()
            .map(|entry| ReportRow {
                region: entry.region.clone().unwrap_or_default(),
                name: entry.name.clone(),
                code: entry.code.to_string(),
                counts: consolidated
                    .get(entry.code.as_str())
                    .copied()
                    .unwrap_or_default(),
                observations: String::new(),
            })
            .collect();

        Ok(NotificationReport::new(
            request.year,
            request.week,
            area_code.map(str::to_string),
            region.map(str::to_string),
            rows,
        ))
    }

    /// Distinct region labels of the roster
    pub fn region_options(&self) -> Vec<String> {
        self.snapshot.roster.region_options()
    }

    /// Empty and repeated codes in the raw roster
    pub fn roster_issues(&self) -> RosterIssues {
        roster_issues(&self.snapshot.roster_table)
    }

    pub fn statistics(&self) -> SnapshotStatistics {
        self.snapshot.statistics()
    }
}

/// Run an aggregation, turning a panic into [`EpiError::Aggregation`]
fn guard_aggregation<T>(operation: &str, compute: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(compute)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(operation, detail = %detail, "aggregation fault");
        EpiError::Aggregation {
            operation: operation.to_string(),
            detail,
        }
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_week(week: i32) -> Result<()> {
    let range = WeekRange::full_year();
    if range.contains(week) {
        Ok(())
    } else {
        Err(EpiError::invalid_parameter(
            "week",
            week,
            "epidemiological weeks run from 1 to 53",
        ))
    }
}

/// Weekly pivot parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotQuery {
    pub year: i32,
    pub indicator: Indicator,
    pub group_by: GroupBy,
    pub weeks: WeekRange,
    /// Only facilities whose roster region matches (case-insensitive)
    pub region: Option<String>,
}

impl PivotQuery {
    /// Pivot over the whole year, grouped by facility
    pub fn new(year: i32, indicator: Indicator) -> Self {
        Self {
            year,
            indicator,
            group_by: GroupBy::default(),
            weeks: WeekRange::full_year(),
            region: None,
        }
    }

    /// Parse untyped request parameters
    pub fn from_params(
        year: i32,
        indicator: &str,
        group_by: &str,
        week_start: i32,
        week_end: i32,
        region: Option<&str>,
    ) -> Result<Self> {
        let mut query = Self::new(year, indicator.parse()?)
            .group_by(group_by.parse()?)
            .weeks(week_start, week_end);
        if let Some(region) = region {
            query = query.region(region);
        }
        Ok(query)
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Week range, clamped into `[1, 53]` with `end >= start`
    pub fn weeks(mut self, start: i32, end: i32) -> Self {
        self.weeks = WeekRange::clamped(start, end);
        self
    }

    /// Region filter; a blank value clears it
    pub fn region<S: AsRef<str>>(mut self, region: S) -> Self {
        self.region = non_blank(Some(region.as_ref())).map(str::to_string);
        self
    }
}

struct SeriesAccumulator {
    label: String,
    code: Option<FacilityCode>,
    values: Vec<f64>,
}

impl SeriesAccumulator {
    fn finish(self) -> PivotSeries {
        let total = round_count(self.values.iter().sum());
        PivotSeries {
            label: self.label,
            code: self.code,
            values: self.values.into_iter().map(round_count).collect(),
            total,
        }
    }
}

/// Round half to even, the way the dashboards have always displayed counts
fn round_count(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// One line of the pivot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSeries {
    pub label: String,
    /// Facility code of the row that opened the series (facility grouping only)
    pub code: Option<FacilityCode>,
    pub values: Vec<i64>,
    pub total: i64,
}

/// Weekly pivot output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotResult {
    pub indicator: Indicator,
    pub group_by: GroupBy,
    pub weeks: Vec<u32>,
    /// Series by descending total
    pub rows: Vec<PivotSeries>,
    pub total_row: PivotSeries,
}

impl PivotResult {
    fn empty(query: &PivotQuery) -> Self {
        let width = query.weeks.len();
        Self {
            indicator: query.indicator,
            group_by: query.group_by,
            weeks: query.weeks.weeks().collect(),
            rows: Vec::new(),
            total_row: PivotSeries {
                label: TOTAL_LABEL.to_string(),
                code: None,
                values: vec![0; width],
                total: 0,
            },
        }
    }
}

/// Weekly summary parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryQuery {
    pub year: i32,
    pub week: i32,
    pub region: Option<String>,
    /// Also list roster facilities that did not report
    pub include_all: bool,
}

impl SummaryQuery {
    pub fn new(year: i32, week: i32) -> Self {
        Self {
            year,
            week,
            region: None,
            include_all: true,
        }
    }

    /// Region filter; a blank value clears it
    pub fn region<S: AsRef<str>>(mut self, region: S) -> Self {
        self.region = non_blank(Some(region.as_ref())).map(str::to_string);
        self
    }

    pub fn include_all(mut self, include_all: bool) -> Self {
        self.include_all = include_all;
        self
    }

    fn validate(&self) -> Result<()> {
        validate_week(self.week)
    }
}

/// Counts of one facility in the summarized week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitySummary {
    pub code: FacilityCode,
    pub name: String,
    pub region: Option<String>,
    pub area_code: Option<String>,
    #[serde(flatten)]
    pub counts: CategoryCounts,
    pub notified: bool,
}

/// Weekly summary output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub year: i32,
    pub week: i32,
    pub region: Option<String>,
    pub include_all: bool,
    pub notified_count: usize,
    pub non_notified_count: usize,
    /// Column sums over `rows`
    pub totals: CategoryCounts,
    /// Ordered by region, then name
    pub rows: Vec<FacilitySummary>,
}

/// One facility line sent by a client for the notification report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    /// Facility code as typed by the client
    pub code: String,
    #[serde(flatten)]
    pub counts: CategoryCounts,
}

/// Notification report parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub year: i32,
    pub week: i32,
    /// Only facilities whose area code starts with this prefix
    #[serde(default)]
    pub area_code: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub rows: Vec<ConsolidatedRow>,
}

impl ReportRequest {
    pub fn new(year: i32, week: i32) -> Self {
        Self {
            year,
            week,
            area_code: None,
            region: None,
            rows: Vec::new(),
        }
    }

    pub fn area_code<S: Into<String>>(mut self, area_code: S) -> Self {
        self.area_code = Some(area_code.into());
        self
    }

    pub fn region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn row<S: Into<String>>(mut self, code: S, counts: CategoryCounts) -> Self {
        self.rows.push(ConsolidatedRow {
            code: code.into(),
            counts,
        });
        self
    }

    fn validate(&self) -> Result<()> {
        validate_week(self.week)?;
        if let Some(area) = non_blank(self.area_code.as_deref()) {
            if !area.chars().all(|c| c.is_ascii_digit()) {
                return Err(EpiError::invalid_parameter(
                    "area_code",
                    area,
                    "area codes are numeric",
                ));
            }
        }
        Ok(())
    }
}

/// One facility line of the notification report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub region: String,
    pub name: String,
    pub code: String,
    #[serde(flatten)]
    pub counts: CategoryCounts,
    pub observations: String,
}

impl ReportRow {
    pub fn is_notified(&self) -> bool {
        self.counts.is_notified()
    }
}

/// Weekly notification report, ready for the report writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReport {
    pub year: i32,
    pub week: i32,
    pub area_code: Option<String>,
    pub region: Option<String>,
    pub total_facilities: usize,
    pub notified_count: usize,
    pub non_notified_count: usize,
    pub rows: Vec<ReportRow>,
}

impl NotificationReport {
    /// Assemble a report, deriving the facility counts from `rows`
    pub fn new(
        year: i32,
        week: i32,
        area_code: Option<String>,
        region: Option<String>,
        rows: Vec<ReportRow>,
    ) -> Self {
        let notified_count = rows.iter().filter(|row| row.is_notified()).count();
        Self {
            year,
            week,
            area_code,
            region,
            total_facilities: rows.len(),
            notified_count,
            non_notified_count: rows.len() - notified_count,
            rows,
        }
    }
}

impl From<&SummaryResult> for NotificationReport {
    fn from(summary: &SummaryResult) -> Self {
        let rows: Vec<ReportRow> = summary
            .rows
            .iter()
            .map(|facility| ReportRow {
                region: facility.region.clone().unwrap_or_default(),
                name: facility.name.clone(),
                code: facility.code.to_string(),
                counts: facility.counts,
                observations: String::new(),
            })
            .collect();

        // notification status comes from the summary, not from truncated counts
        Self {
            year: summary.year,
            week: summary.week,
            area_code: None,
            region: summary.region.clone(),
            total_facilities: rows.len(),
            notified_count: summary.notified_count,
            non_notified_count: summary.non_notified_count,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{SourceReader, SourceTable};

    fn table(text: &str) -> SourceTable {
        SourceReader::new().parse_bytes(text.as_bytes()).unwrap()
    }

    fn fixture() -> Snapshot {
        let roster = table(
            "renaes;raz_soc;ris;ubigeo\n\
             150140D101;CS Alfa;01 RIS NORTE;150140\n\
             150140D102;CS Beta;01 RIS NORTE;150140\n\
             150141D201;PS Gamma;02 RIS SUR;150141\n",
        );
        let iras = table(
            "ano;semana;renaes;ira_m2;ira_2a11;neu_m2;sob_2a4\n\
             2024;10;150140D101;2;3;1;0\n\
             2024;11;150140D101;1;0;0;0\n\
             2024;10;150141D201;4;0;0;1\n\
             2024;10;999999Z999;5;0;0;0\n\
             2023;10;150140D101;7;0;0;0\n\
             2024;10;sin codigo;9;0;0;0\n",
        );
        let edas = table(
            "anio;se;e_salud;daa_m1;dis_m1\n\
             2024;10;150140D102;0;0\n\
             2024;10;150140D101;2;1\n",
        );
        let febriles = table(
            "ano;semana;renaes;feb_tot;feb_m1\n\
             2024;10;150141D201;0;2\n",
        );
        Snapshot::from_tables(iras, edas, febriles, roster)
    }

    fn labels(result: &PivotResult) -> Vec<(&str, i64)> {
        result.rows.iter().map(|s| (s.label.as_str(), s.total)).collect()
    }

    #[test]
    fn test_pivot_by_facility() {
        let snapshot = fixture();
        let query = PivotQuery::new(2024, Indicator::Ira).weeks(10, 11);
        let result = snapshot.analytics().pivot(&query);

        assert_eq!(result.weeks, vec![10, 11]);
        assert_eq!(
            labels(&result),
            vec![("CS Alfa", 6), ("999999Z999", 5), ("PS Gamma", 4)]
        );
        assert_eq!(result.rows[0].values, vec![5, 1]);
        assert_eq!(result.rows[0].code.as_ref().map(FacilityCode::as_str), Some("150140D101"));
        assert_eq!(result.total_row.label, TOTAL_LABEL);
        assert_eq!(result.total_row.values, vec![14, 1]);
        assert_eq!(result.total_row.total, 15);
    }

    #[test]
    fn test_pivot_by_region_and_region_filter() {
        let snapshot = fixture();
        let analytics = snapshot.analytics();

        let query = PivotQuery::new(2024, Indicator::Ira)
            .weeks(10, 11)
            .group_by(GroupBy::Region);
        let result = analytics.pivot(&query);
        assert_eq!(
            labels(&result),
            vec![("RIS NORTE", 6), (UNKNOWN_REGION_LABEL, 5), ("RIS SUR", 4)]
        );
        assert!(result.rows.iter().all(|s| s.code.is_none()));

        // unknown facilities drop out once a region is requested
        let filtered = analytics.pivot(&query.clone().region("ris sur"));
        assert_eq!(labels(&filtered), vec![("RIS SUR", 4)]);
    }

    #[test]
    fn test_pivot_composite_indicator_keeps_zero_series() {
        let snapshot = fixture();
        let query = PivotQuery::new(2024, Indicator::Eda).weeks(10, 10);
        let result = snapshot.analytics().pivot(&query);
        assert_eq!(labels(&result), vec![("CS Alfa", 3), ("CS Beta", 0)]);
    }

    #[test]
    fn test_pivot_reversed_range_is_clamped() {
        let snapshot = fixture();
        let query = PivotQuery::from_params(2024, "ira", "estab", 40, 10, None).unwrap();
        let result = snapshot.analytics().pivot(&query);
        assert_eq!(result.weeks, vec![40]);
        assert!(result.rows.is_empty());
        assert_eq!(result.total_row.values, vec![0]);
    }

    #[test]
    fn test_pivot_is_idempotent() {
        let snapshot = fixture();
        let analytics = snapshot.analytics();
        let query = PivotQuery::new(2024, Indicator::Ira).weeks(1, 53);
        let first = serde_json::to_string(&analytics.pivot(&query)).unwrap();
        let second = serde_json::to_string(&analytics.pivot(&query)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pivot_rounds_half_to_even() {
        let iras = table(
            "ano;semana;renaes;ira_m2\n\
             2024;1;150140D101;2,5\n\
             2024;2;150140D101;3,5\n",
        );
        let snapshot = Snapshot::from_tables(iras, SourceTable::empty(), SourceTable::empty(), SourceTable::empty());
        let result = snapshot
            .analytics()
            .pivot(&PivotQuery::new(2024, Indicator::Ira).weeks(1, 2));
        assert_eq!(result.rows[0].values, vec![2, 4]);
        assert_eq!(result.rows[0].total, 6);
        assert_eq!(result.total_row.total, 6);
    }

    #[test]
    fn test_pivot_rejects_unknown_parameters() {
        let err = PivotQuery::from_params(2024, "DENGUE", "estab", 1, 53, None).unwrap_err();
        assert!(err.is_client_error());
        let err = PivotQuery::from_params(2024, "EDA", "district", 1, 53, None).unwrap_err();
        assert!(matches!(err, EpiError::InvalidGroupBy { .. }));
    }

    #[test]
    fn test_summary_includes_roster_and_unreconciled_facilities() {
        let snapshot = fixture();
        let summary = snapshot.analytics().summary(&SummaryQuery::new(2024, 10)).unwrap();

        let order: Vec<&str> = summary.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["999999Z999", "CS Alfa", "CS Beta", "PS Gamma"]);
        assert_eq!(summary.notified_count, 3);
        assert_eq!(summary.non_notified_count, 1);

        let alfa = &summary.rows[1];
        assert_eq!(alfa.counts.ira, 5);
        assert_eq!(alfa.counts.pneumonia, 1);
        assert_eq!(alfa.counts.eda_aqueous, 2);
        assert_eq!(alfa.counts.dysentery, 1);
        assert_eq!(alfa.area_code.as_deref(), Some("150140"));

        let gamma = &summary.rows[3];
        assert_eq!(gamma.counts.febrile, 2);
        assert_eq!(gamma.counts.sob_asma, 1);

        assert!(!summary.rows[2].notified);
        assert_eq!(summary.rows[0].region, None);
    }

    #[test]
    fn test_summary_totals_match_rows() {
        let snapshot = fixture();
        let analytics = snapshot.analytics();
        for query in [
            SummaryQuery::new(2024, 10),
            SummaryQuery::new(2024, 11).include_all(false),
            SummaryQuery::new(2024, 10).region("RIS NORTE"),
            SummaryQuery::new(2030, 1),
        ] {
            let summary = analytics.summary(&query).unwrap();
            assert_eq!(summary.notified_count + summary.non_notified_count, summary.rows.len());
            let mut sums = CategoryCounts::default();
            for row in &summary.rows {
                sums += row.counts;
            }
            assert_eq!(summary.totals, sums);
        }
    }

    #[test]
    fn test_summary_region_filter_and_reporters_only() {
        let snapshot = fixture();
        let analytics = snapshot.analytics();

        let north = analytics
            .summary(&SummaryQuery::new(2024, 10).region("ris norte").include_all(false))
            .unwrap();
        let codes: Vec<&str> = north.rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["150140D101", "150140D102"]);
        assert_eq!(north.notified_count, 1);

        let quiet_week = analytics
            .summary(&SummaryQuery::new(2024, 11).include_all(false))
            .unwrap();
        assert_eq!(quiet_week.rows.len(), 1);
        assert_eq!(quiet_week.totals.ira, 1);
    }

    #[test]
    fn test_summary_rejects_impossible_week() {
        let snapshot = fixture();
        let err = snapshot.analytics().summary(&SummaryQuery::new(2024, 60)).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_guard_turns_panic_into_aggregation_error() {
        let result: Result<()> = guard_aggregation("summary", || panic!("broken row"));
        match result {
            Err(EpiError::Aggregation { operation, detail }) => {
                assert_eq!(operation, "summary");
                assert_eq!(detail, "broken row");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_notification_report_consolidates_rows() {
        let snapshot = fixture();
        let request = ReportRequest::new(2024, 10)
            .area_code("150140")
            .row(" 150140-d101 ", CategoryCounts { ira: 2, ..Default::default() })
            .row("150140D101", CategoryCounts { febrile: 1, ..Default::default() })
            .row("desconocido", CategoryCounts { ira: 3, ..Default::default() });

        let report = snapshot.analytics().notification_report(&request).unwrap();
        assert_eq!(report.total_facilities, 2);
        assert_eq!(report.notified_count, 1);
        assert_eq!(report.non_notified_count, 1);

        let alfa = &report.rows[0];
        assert_eq!(alfa.name, "CS Alfa");
        assert_eq!(alfa.region, "RIS NORTE");
        assert_eq!((alfa.counts.ira, alfa.counts.febrile), (2, 1));
        assert_eq!(report.rows[1].counts, CategoryCounts::default());
    }

    #[test]
    fn test_notification_report_region_filter() {
        let snapshot = fixture();
        let request = ReportRequest::new(2024, 10).region("ris sur");
        let report = snapshot.analytics().notification_report(&request).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].code, "150141D201");

        let bad = ReportRequest::new(2024, 10).area_code("15O140");
        assert!(snapshot.analytics().notification_report(&bad).is_err());
    }

    #[test]
    fn test_report_from_summary() {
        let snapshot = fixture();
        let summary = snapshot.analytics().summary(&SummaryQuery::new(2024, 10)).unwrap();
        let report = NotificationReport::from(&summary);
        assert_eq!(report.total_facilities, summary.rows.len());
        assert_eq!(report.notified_count, summary.notified_count);
        assert_eq!(report.rows[0].region, "");
        assert_eq!(report.rows[1].code, "150140D101");
        assert_eq!(report.rows[1].counts, summary.rows[1].counts);
    }

    #[test]
    fn test_consolidated_row_json_defaults_missing_counts() {
        let row: ConsolidatedRow = serde_json::from_str(r#"{"code":"150140D101","ira":4}"#).unwrap();
        assert_eq!(row.counts.ira, 4);
        assert_eq!(row.counts.febrile, 0);
    }
}
