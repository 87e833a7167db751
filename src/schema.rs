/*!
 * Column conventions of the surveillance exports
 *
 * The exports are not schema-stable: the same concept shows up under
 * several header spellings and case counts are spread over families of
 * columns sharing a prefix (`daa_m1`, `daa_1a4`, ...). Every header-name
 * guess lives here, behind [`SurveillanceRow`], so aggregation code never
 * names a column itself.
 */

use crate::data_types::{Category, FacilityCode, Indicator};
use crate::reader::{parse_number, Row};

/// Year column spellings, tried in order
pub const YEAR_COLUMNS: &[&str] = &["ano", "anio", "año"];

/// Epidemiological week column spellings, tried in order
pub const WEEK_COLUMNS: &[&str] = &["semana", "se"];

/// Columns that usually hold the facility code in notification sources
pub const SOURCE_CODE_COLUMNS: &[&str] = &[
    "renaes",
    "e_salud",
    "e_sal",
    "eess",
    "cod_eess",
    "codigo_eess",
    "codigo",
    "sub_reg_nt",
];

/// Columns that usually hold the facility code in the roster
pub const ROSTER_CODE_COLUMNS: &[&str] = &["renaes", "e_salud"];

/// Roster display name columns: legal name, facility name, name, alternates
pub const ROSTER_NAME_COLUMNS: &[&str] = &[
    "raz_soc",
    "establecimiento",
    "nombre",
    "nom_estab",
    "nombre_establecimiento",
];

/// Roster region (RIS) column
pub const ROSTER_REGION_COLUMN: &str = "ris";

/// Used when the roster has no region column value
pub const ROSTER_SUBREGION_COLUMN: &str = "subregion";

/// Roster area code (ubigeo) columns
pub const ROSTER_AREA_CODE_COLUMNS: &[&str] = &["ubigeo_rn", "ubigeo"];

/// Fallback code scan looks at no more than this many extra columns
pub const FALLBACK_SCAN_LIMIT: usize = 5;

/// Fallback code scan ignores values longer than this
pub const FALLBACK_MAX_VALUE_LEN: usize = 32;

const FEBRILE_TOTAL_PREFIXES: &[&str] = &["feb_tot"];

/// Column-prefix families summed for a category.
///
/// A column contributes when its name equals or starts with any prefix of
/// the family; each column is counted once.
pub fn category_prefixes(category: Category) -> &'static [&'static str] {
    match category {
        Category::Ira => &["ira_", "ira"],
        Category::Pneumonia => &["neu_", "neumonia", "neumonias"],
        Category::SobAsma => &["sob_", "sob_asma", "asma"],
        Category::EdaAqueous => &["daa_", "eda_acuosa", "eda"],
        Category::Dysentery => &["dis_", "disenterica"],
        Category::Febrile => &["feb_", "feb"],
    }
}

/// Sum every numeric cell whose column matches one of the prefixes.
/// Unparseable cells contribute zero.
pub fn sum_prefixed(row: &Row, prefixes: &[&str]) -> f64 {
    row.iter()
        .filter(|(name, _)| prefixes.iter().any(|prefix| name.starts_with(prefix)))
        .filter_map(|(_, value)| parse_number(value))
        .sum()
}

/// Find the facility code of a row.
///
/// `preferred` columns are tried first. When none of them normalizes, up to
/// [`FALLBACK_SCAN_LIMIT`] of the remaining columns with short values are
/// scanned in header order and the first success wins.
pub fn extract_facility_code(row: &Row, preferred: &[&str]) -> Option<FacilityCode> {
    preferred
        .iter()
        .filter_map(|column| row.get(column))
        .find_map(|value| FacilityCode::normalize(value).ok())
        .or_else(|| {
            row.iter()
                .filter(|(name, _)| !preferred.contains(name))
                .filter(|(_, value)| value.chars().count() <= FALLBACK_MAX_VALUE_LEN)
                .take(FALLBACK_SCAN_LIMIT)
                .find_map(|(_, value)| FacilityCode::normalize(value).ok())
        })
}

/// Typed accessors over a notification source row
pub trait SurveillanceRow {
    /// Reporting year, if any year column holds an integer
    fn year(&self) -> Option<i32>;

    /// Epidemiological week, if any week column holds an integer
    fn week(&self) -> Option<i32>;

    /// Facility code found in the row
    fn facility_code(&self) -> Option<FacilityCode>;

    /// Case count of one category in this row
    fn category_value(&self, category: Category) -> f64;

    /// Indicator value: the sum of its categories
    fn indicator_value(&self, indicator: Indicator) -> f64 {
        indicator
            .categories()
            .iter()
            .map(|category| self.category_value(*category))
            .sum()
    }

    /// Whether the row belongs to exactly this year and week
    fn is_period(&self, year: i32, week: i32) -> bool {
        self.year() == Some(year) && self.week() == Some(week)
    }
}

impl SurveillanceRow for Row {
    fn year(&self) -> Option<i32> {
        self.first_int(YEAR_COLUMNS)
    }

    fn week(&self) -> Option<i32> {
        self.first_int(WEEK_COLUMNS)
    }

    fn facility_code(&self) -> Option<FacilityCode> {
        extract_facility_code(self, SOURCE_CODE_COLUMNS)
    }

    fn category_value(&self, category: Category) -> f64 {
        if category == Category::Febrile {
            // feb_tot wins when it carries anything, otherwise the feb_ family
            let total = sum_prefixed(self, FEBRILE_TOTAL_PREFIXES);
            if total > 0.0 {
                return total;
            }
        }
        sum_prefixed(self, category_prefixes(category))
    }
}
