/*!
 * Data type definitions for surveillance records
 *
 * Typed vocabulary shared by the reader, the roster index and the
 * aggregation engine: facility codes, source files, disease categories,
 * indicators, grouping modes and epidemiological week ranges.
 */

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants, EpiError, Result};

/// Length of a canonical facility code (`DDDDDD` + letter + `DDD`)
pub const FACILITY_CODE_LEN: usize = 10;

/// Working buffer cap for code extraction; longer inputs are truncated
pub const MAX_CODE_BUFFER: usize = 32;

/// Reason a text value did not yield a facility code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMismatch {
    #[error("value is blank")]
    Empty,
    #[error("only {found} alphanumeric characters, need {FACILITY_CODE_LEN}")]
    TooShort { found: usize },
    #[error("no 6-digit + letter + 3-digit sequence found")]
    NoMatch,
}

/// Facility code (RENAES) - canonical 10 character identifier such as `150140D101`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FacilityCode(String);

impl FacilityCode {
    /// Extract the canonical code from arbitrary text.
    ///
    /// Non-alphanumeric characters are dropped, the rest is uppercased and
    /// capped at [`MAX_CODE_BUFFER`] characters, then the first 10 character
    /// window shaped `DDDDDD` + letter + `DDD` wins. Inputs holding two
    /// valid-looking windows resolve to the leftmost one.
    pub fn normalize(raw: &str) -> std::result::Result<Self, CodeMismatch> {
        if raw.trim().is_empty() {
            return Err(CodeMismatch::Empty);
        }

        let mut buf: Vec<char> = Vec::with_capacity(MAX_CODE_BUFFER);
        'fill: for ch in raw.chars().filter(|c| c.is_alphanumeric()) {
            for upper in ch.to_uppercase() {
                if buf.len() >= MAX_CODE_BUFFER {
                    break 'fill;
                }
                buf.push(upper);
            }
        }

        if buf.len() < FACILITY_CODE_LEN {
            return Err(CodeMismatch::TooShort { found: buf.len() });
        }

        buf.windows(FACILITY_CODE_LEN)
            .find(|window| has_code_shape(window))
            .map(|window| FacilityCode(window.iter().collect()))
            .ok_or(CodeMismatch::NoMatch)
    }

    /// Strict constructor for values that must be a code (CLI/HTTP input)
    pub fn parse(raw: &str) -> Result<Self> {
        Self::normalize(raw).map_err(|reason| EpiError::InvalidFacilityCode {
            value: raw.to_string(),
            reason,
        })
    }

    /// Get the code as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading six digits, which double as the facility's area code
    pub fn area_prefix(&self) -> &str {
        &self.0[..6]
    }
}

fn has_code_shape(window: &[char]) -> bool {
    window[..6].iter().all(|c| c.is_ascii_digit())
        && window[6].is_ascii_alphabetic()
        && window[7..].iter().all(|c| c.is_ascii_digit())
}

impl fmt::Display for FacilityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FacilityCode {
    type Error = CodeMismatch;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

impl From<FacilityCode> for String {
    fn from(code: FacilityCode) -> Self {
        code.0
    }
}

/// The source files the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Acute respiratory infections
    Ira,
    /// Acute diarrheal disease
    Eda,
    /// Febrile syndromes
    Febrile,
    /// Facility master roster
    Roster,
    /// Individual notification export (accepted on upload, not aggregated)
    Individual,
}

impl SourceKind {
    /// Every accepted file, in upload allow-list order
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Ira,
        SourceKind::Eda,
        SourceKind::Febrile,
        SourceKind::Individual,
        SourceKind::Roster,
    ];

    /// Files whose modification time keys the snapshot
    pub const TRACKED: [SourceKind; 4] = [
        SourceKind::Ira,
        SourceKind::Eda,
        SourceKind::Febrile,
        SourceKind::Roster,
    ];

    pub const fn file_name(&self) -> &'static str {
        match self {
            SourceKind::Ira => constants::IRA_FILE,
            SourceKind::Eda => constants::EDA_FILE,
            SourceKind::Febrile => constants::FEBRILE_FILE,
            SourceKind::Roster => constants::ROSTER_FILE,
            SourceKind::Individual => constants::INDIVIDUAL_FILE,
        }
    }

    /// Look up a source by its file name (case-insensitive)
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.file_name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Disease category counted per facility and week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Ira,
    Pneumonia,
    SobAsma,
    EdaAqueous,
    Dysentery,
    Febrile,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Ira,
        Category::Pneumonia,
        Category::SobAsma,
        Category::EdaAqueous,
        Category::Dysentery,
        Category::Febrile,
    ];

    /// The clinical table this category is read from
    pub fn source(&self) -> SourceKind {
        match self {
            Category::Ira | Category::Pneumonia | Category::SobAsma => SourceKind::Ira,
            Category::EdaAqueous | Category::Dysentery => SourceKind::Eda,
            Category::Febrile => SourceKind::Febrile,
        }
    }
}

/// Per-category integer counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCounts {
    pub ira: i64,
    pub pneumonia: i64,
    pub sob_asma: i64,
    pub eda_aqueous: i64,
    pub dysentery: i64,
    pub febrile: i64,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> i64 {
        match category {
            Category::Ira => self.ira,
            Category::Pneumonia => self.pneumonia,
            Category::SobAsma => self.sob_asma,
            Category::EdaAqueous => self.eda_aqueous,
            Category::Dysentery => self.dysentery,
            Category::Febrile => self.febrile,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut i64 {
        match category {
            Category::Ira => &mut self.ira,
            Category::Pneumonia => &mut self.pneumonia,
            Category::SobAsma => &mut self.sob_asma,
            Category::EdaAqueous => &mut self.eda_aqueous,
            Category::Dysentery => &mut self.dysentery,
            Category::Febrile => &mut self.febrile,
        }
    }

    /// Sum over all six categories
    pub fn total(&self) -> i64 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }

    /// A facility is notified when anything at all was reported
    pub fn is_notified(&self) -> bool {
        self.total() > 0
    }
}

impl std::ops::AddAssign for CategoryCounts {
    fn add_assign(&mut self, rhs: Self) {
        for category in Category::ALL {
            *self.get_mut(category) += rhs.get(category);
        }
    }
}

/// Indicator selectable in the weekly pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    /// Acute diarrhea, aqueous plus dysenteric
    Eda,
    Ira,
    /// Pneumonia
    Neu,
    SobAsma,
    Feb,
}

impl Indicator {
    pub const ALL: [Indicator; 5] = [
        Indicator::Eda,
        Indicator::Ira,
        Indicator::Neu,
        Indicator::SobAsma,
        Indicator::Feb,
    ];

    pub fn as_code(&self) -> &'static str {
        match self {
            Indicator::Eda => "EDA",
            Indicator::Ira => "IRA",
            Indicator::Neu => "NEU",
            Indicator::SobAsma => "SOBASMA",
            Indicator::Feb => "FEB",
        }
    }

    /// Categories summed to produce the indicator value of one row
    pub fn categories(&self) -> &'static [Category] {
        match self {
            Indicator::Eda => &[Category::EdaAqueous, Category::Dysentery],
            Indicator::Ira => &[Category::Ira],
            Indicator::Neu => &[Category::Pneumonia],
            Indicator::SobAsma => &[Category::SobAsma],
            Indicator::Feb => &[Category::Febrile],
        }
    }

    pub fn source(&self) -> SourceKind {
        self.categories()[0].source()
    }
}

impl FromStr for Indicator {
    type Err = EpiError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|i| i.as_code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EpiError::invalid_indicator(s))
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Series dimension of the weekly pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupBy {
    /// One series per facility display name
    #[default]
    Facility,
    /// One series per region label
    Region,
}

impl GroupBy {
    pub fn as_code(&self) -> &'static str {
        match self {
            GroupBy::Facility => "estab",
            GroupBy::Region => "ris",
        }
    }
}

impl FromStr for GroupBy {
    type Err = EpiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "estab" | "facility" => Ok(GroupBy::Facility),
            "ris" | "region" => Ok(GroupBy::Region),
            _ => Err(EpiError::invalid_group_by(s)),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Inclusive range of epidemiological weeks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekRange {
    start: u32,
    end: u32,
}

impl WeekRange {
    pub const FIRST_WEEK: u32 = 1;
    pub const LAST_WEEK: u32 = 53;

    /// Clamp both ends into `[1, 53]` and raise `end` to at least `start`
    pub fn clamped(start: i32, end: i32) -> Self {
        let first = Self::FIRST_WEEK as i32;
        let last = Self::LAST_WEEK as i32;
        let start = start.clamp(first, last);
        let end = end.min(last).max(start);
        Self {
            start: start as u32,
            end: end as u32,
        }
    }

    pub fn full_year() -> Self {
        Self::clamped(Self::FIRST_WEEK as i32, Self::LAST_WEEK as i32)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of weeks covered, never zero
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn contains(&self, week: i32) -> bool {
        week >= self.start as i32 && week <= self.end as i32
    }

    /// Column index of a week inside the range
    pub fn offset(&self, week: i32) -> Option<usize> {
        self.contains(week).then(|| (week - self.start as i32) as usize)
    }

    pub fn weeks(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl Default for WeekRange {
    fn default() -> Self {
        Self::full_year()
    }
}

/// Descriptive attributes of one roster facility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub code: FacilityCode,
    /// Display name, the code itself when the roster has none
    pub name: String,
    /// Region (RIS) label with any numeric prefix removed
    pub region: Option<String>,
    /// Six digit administrative area code (ubigeo)
    pub area_code: Option<String>,
}

impl RosterEntry {
    /// Whether this facility belongs to the given region (trimmed, case-insensitive)
    pub fn in_region(&self, region: &str) -> bool {
        self.region
            .as_deref()
            .map(|r| r.trim().to_lowercase() == region.trim().to_lowercase())
            .unwrap_or(false)
    }
}

/// Remove a leading numeric prefix and the whitespace after it ("03 RIS LIMA" -> "RIS LIMA")
pub fn strip_region_prefix(label: &str) -> &str {
    label
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start()
}
