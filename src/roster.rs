/*!
 * Facility master roster index
 *
 * Maps each facility code to its display name, region label and area code.
 * Rows whose code cannot be recovered are skipped; when a code repeats the
 * later row wins. Repeats stay visible through [`roster_issues`].
 */

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::data_types::{strip_region_prefix, FacilityCode, RosterEntry};
use crate::reader::{Row, SourceTable};
use crate::schema::{
    extract_facility_code, ROSTER_AREA_CODE_COLUMNS, ROSTER_CODE_COLUMNS, ROSTER_NAME_COLUMNS,
    ROSTER_REGION_COLUMN, ROSTER_SUBREGION_COLUMN,
};

/// Lookup from facility code to roster attributes
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    entries: HashMap<FacilityCode, RosterEntry>,
    skipped_rows: usize,
}

impl RosterIndex {
    /// Build the index from the roster table
    pub fn build(table: &SourceTable) -> Self {
        let mut entries = HashMap::with_capacity(table.len());
        let mut skipped_rows = 0;
        let mut overwritten = 0;

        for row in table {
            let Some(code) = roster_code(row) else {
                skipped_rows += 1;
                continue;
            };
            let entry = RosterEntry::from_roster_row(row, code.clone());
            if entries.insert(code, entry).is_some() {
                overwritten += 1;
            }
        }

        if overwritten > 0 {
            warn!(overwritten, "roster contains repeated facility codes, last row kept");
        }
        debug!(
            facilities = entries.len(),
            skipped_rows,
            "built roster index"
        );

        Self {
            entries,
            skipped_rows,
        }
    }

    pub fn get(&self, code: &FacilityCode) -> Option<&RosterEntry> {
        self.entries.get(code)
    }

    pub fn contains(&self, code: &FacilityCode) -> bool {
        self.entries.contains_key(code)
    }

    /// Region label of a facility, if known
    pub fn region_of(&self, code: &FacilityCode) -> Option<&str> {
        self.get(code).and_then(|entry| entry.region.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Roster rows dropped because no code could be found
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Distinct region labels, case-insensitively de-duplicated and sorted
    pub fn region_options(&self) -> Vec<String> {
        let mut options: Vec<(String, String)> = self
            .entries
            .values()
            .filter_map(|entry| entry.region.as_deref())
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(|label| (label.to_lowercase(), label.to_string()))
            .collect();
        // equal labels end up adjacent; the byte-smallest spelling survives
        options.sort();
        options.dedup_by(|a, b| a.0 == b.0);
        options.into_iter().map(|(_, label)| label).collect()
    }
}

impl RosterEntry {
    /// Derive roster attributes from a roster row whose code is already known
    pub fn from_roster_row(row: &Row, code: FacilityCode) -> Self {
        let name = row
            .first_text(ROSTER_NAME_COLUMNS)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| code.as_str().to_string());

        let region = row
            .text(ROSTER_REGION_COLUMN)
            .map(strip_region_prefix)
            .filter(|label| !label.is_empty())
            .or_else(|| row.text(ROSTER_SUBREGION_COLUMN).map(str::trim))
            .map(str::to_string);

        let area_code = ROSTER_AREA_CODE_COLUMNS
            .iter()
            .filter_map(|column| row.text(column))
            .map(str::trim)
            .find(|value| value.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .or_else(|| Some(code.area_prefix().to_string()));

        Self {
            code,
            name,
            region,
            area_code,
        }
    }
}

fn roster_code(row: &Row) -> Option<FacilityCode> {
    extract_facility_code(row, ROSTER_CODE_COLUMNS)
}

/// A facility code that occurs on more than one roster row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCode {
    pub code: FacilityCode,
    pub count: usize,
}

/// Roster data quality report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterIssues {
    /// Rows whose facility code could not be recovered
    pub empty: usize,
    pub duplicates: Vec<DuplicateCode>,
}

/// Count repeated codes over the raw roster rows.
///
/// Sorted by descending count, then code.
pub fn duplicate_codes(table: &SourceTable) -> Vec<DuplicateCode> {
    roster_issues(table).duplicates
}

/// Recompute roster issues from the raw rows, independently of the index
pub fn roster_issues(table: &SourceTable) -> RosterIssues {
    let mut counts: HashMap<FacilityCode, usize> = HashMap::new();
    let mut empty = 0;
    for row in table {
        match roster_code(row) {
            Some(code) => *counts.entry(code).or_default() += 1,
            None => empty += 1,
        }
    }

    let mut duplicates: Vec<DuplicateCode> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(code, count)| DuplicateCode { code, count })
        .collect();
    duplicates.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));

    RosterIssues { empty, duplicates }
}
