/*!
 * Tolerant CSV reader for surveillance exports
 *
 * Source files come from several independent systems: some are comma
 * separated, some semicolon separated, headers vary in case and padding and
 * data lines may be short. The reader turns any of them into a
 * [`SourceTable`] of [`Row`]s keyed by lowercase header name.
 *
 * - The delimiter is decided once per file: `;` if the header line contains
 *   one, `,` otherwise.
 * - Blank lines are skipped, over-long lines are discarded.
 * - A `"` toggles quoting within its own line only.
 * - Short lines are padded with empty strings, extra fields are ignored.
 * - A missing file is an empty table.
 */

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{EpiError, Result};

/// Lines longer than this are dropped instead of failing the read
pub const DEFAULT_MAX_LINE_LENGTH: usize = 200_000;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Normalized header list shared by every row of one table
#[derive(Debug, Default)]
pub struct Headers {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Headers {
    fn new(names: Vec<String>) -> Self {
        // a repeated header name resolves to its last column
        let positions = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self { names, positions }
    }

    /// Header names in file order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Column index of a header, matched case-insensitively
    pub fn position(&self, name: &str) -> Option<usize> {
        if let Some(&idx) = self.positions.get(name) {
            return Some(idx);
        }
        if name.chars().any(|c| c.is_uppercase() || c.is_whitespace()) {
            return self.positions.get(&name.trim().to_lowercase()).copied();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One data line: lowercase header name to raw cell value
#[derive(Debug, Clone)]
pub struct Row {
    headers: Arc<Headers>,
    values: Vec<String>,
}

impl Row {
    /// Build a row, padding or truncating `values` to the header count
    pub fn new(headers: Arc<Headers>, mut values: Vec<String>) -> Self {
        values.resize(headers.len(), String::new());
        Self { headers, values }
    }

    /// Raw value of a column
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .position(name)
            .map(|idx| self.values[idx].as_str())
    }

    /// Value of a column, `None` when absent or blank
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    /// First non-blank value among several column spellings
    pub fn first_text(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.text(name))
    }

    /// Integer value of a column, `None` when absent or not an integer
    pub fn int(&self, name: &str) -> Option<i32> {
        self.get(name)?.trim().parse().ok()
    }

    /// First column among several spellings that holds an integer
    pub fn first_int(&self, names: &[&str]) -> Option<i32> {
        names.iter().find_map(|name| self.int(name))
    }

    /// Columns in header order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// Parse a numeric cell; a decimal comma is accepted
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: f64 = if trimmed.contains(',') {
        trimmed.replace(',', ".").parse().ok()?
    } else {
        trimmed.parse().ok()?
    };
    value.is_finite().then_some(value)
}

/// Rows of one source file, in file order
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    headers: Arc<Headers>,
    rows: Vec<Row>,
}

impl SourceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<'a> IntoIterator for &'a SourceTable {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// CSV reader for source tables
#[derive(Debug, Clone)]
pub struct SourceReader {
    /// Raw lines longer than this many bytes are discarded
    max_line_length: usize,
}

impl Default for SourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader {
    /// Create a new reader with default settings
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Set the line length above which lines are discarded
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Read a table from disk. A missing file yields an empty table.
    pub fn read_path<P: AsRef<Path>>(&self, path: P) -> Result<SourceTable> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "source file absent, using empty table");
                return Ok(SourceTable::empty());
            }
            Err(e) => return Err(EpiError::from(e).with_path(path)),
        };

        let table = self.read(file).map_err(|e| e.with_path(path))?;
        debug!(
            path = %path.display(),
            rows = table.len(),
            columns = table.headers().len(),
            "loaded source table"
        );
        Ok(table)
    }

    /// Read a table from any byte stream
    pub fn read<R: Read>(&self, mut input: R) -> Result<SourceTable> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        self.parse_bytes(&bytes)
    }

    /// Parse a table from an in-memory buffer
    ///
    /// Input is handled one physical line at a time, so an unbalanced quote
    /// only affects the line it appears on.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<SourceTable> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut lines = bytes.split(|b| *b == b'\n').map(trim_carriage_return);

        let header_line = String::from_utf8_lossy(lines.next().unwrap_or_default());
        let delimiter = detect_delimiter(&header_line);
        let names: Vec<String> = split_line(&header_line, delimiter)
            .iter()
            .map(|name| normalize_header(name))
            .collect();
        if names.iter().all(|name| name.is_empty()) {
            return Ok(SourceTable::empty());
        }
        let headers = Arc::new(Headers::new(names));

        let mut rows = Vec::new();
        let mut oversized = 0usize;

        for raw in lines {
            if raw.len() > self.max_line_length {
                oversized += 1;
                continue;
            }
            let line = String::from_utf8_lossy(raw);
            if line.trim().is_empty() {
                continue;
            }
            rows.push(Row::new(Arc::clone(&headers), split_line(&line, delimiter)));
        }

        if oversized > 0 {
            warn!(
                oversized,
                max_line_length = self.max_line_length,
                "discarded over-long lines"
            );
        }

        Ok(SourceTable { headers, rows })
    }
}

fn trim_carriage_return(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn detect_delimiter(header_line: &str) -> char {
    if header_line.contains(';') {
        ';'
    } else {
        ','
    }
}

/// Split one line into fields. Every `"` toggles quoting and is dropped;
/// a delimiter inside quotes is kept as data. Quote state ends with the line.
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn normalize_header(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SourceTable {
        SourceReader::new().parse_bytes(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = parse("a;b;c\n1;2\n");
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.get("a"), Some("1"));
        assert_eq!(row.get("b"), Some("2"));
        assert_eq!(row.get("c"), Some(""));
    }

    #[test]
    fn test_quoted_delimiter_stays_in_field() {
        let table = parse("a,b\n\"x,y\",z\n");
        let row = &table.rows()[0];
        assert_eq!(row.get("a"), Some("x,y"));
        assert_eq!(row.get("b"), Some("z"));
    }

    #[test]
    fn test_quote_inside_field_toggles() {
        let table = parse("a;b\nx \"y;z\" w;q\n");
        let row = &table.rows()[0];
        assert_eq!(row.get("a"), Some("x y;z w"));
        assert_eq!(row.get("b"), Some("q"));
    }

    #[test]
    fn test_unbalanced_quote_stays_on_its_line() {
        let table = parse(
            "ano;semana;renaes;ira_m2\n\
             2024;5;\"150140D101;3\n\
             2024;5;150140D102;4\n\
             2024;5;150140D103;5\n",
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[0].get("renaes"), Some("150140D101;3"));
        assert_eq!(table.rows()[0].get("ira_m2"), Some(""));
        assert_eq!(table.rows()[1].get("renaes"), Some("150140D102"));
        assert_eq!(table.rows()[2].int("ira_m2"), Some(5));
    }

    #[test]
    fn test_delimiter_decided_by_header_line() {
        // commas inside semicolon files are data, not separators
        let table = parse("nombre;casos\nSan Juan, Lima;3\n");
        assert_eq!(table.rows()[0].get("nombre"), Some("San Juan, Lima"));
        assert_eq!(table.rows()[0].int("casos"), Some(3));
    }

    #[test]
    fn test_headers_trimmed_and_lowercased() {
        let table = parse("\u{feff} RENAES ; Ano ;SE\n150140D101;2024;7\n");
        assert_eq!(table.headers().names(), &["renaes", "ano", "se"]);
        let row = &table.rows()[0];
        assert_eq!(row.get("RENAES"), Some("150140D101"));
        assert_eq!(row.int("ano"), Some(2024));
    }

    #[test]
    fn test_blank_lines_skipped_and_extra_fields_ignored() {
        let table = parse("a,b\n\n   \n1,2,3,4\r\n\n5,6\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].iter().count(), 2);
        assert_eq!(table.rows()[1].get("b"), Some("6"));
    }

    #[test]
    fn test_over_long_lines_discarded() {
        let reader = SourceReader::new().with_max_line_length(10);
        let text = format!("a,b\n1,2\n{},3\n4,5\n", "x".repeat(50));
        let table = reader.parse_bytes(text.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].get("a"), Some("4"));
    }

    #[test]
    fn test_line_length_counts_raw_bytes() {
        // 9 bytes of data, 13 with delimiters and quotes
        let reader = SourceReader::new().with_max_line_length(12);
        let table = reader
            .parse_bytes(b"a;b;c\n\"12345\";567;8\n1;2;3\r\n")
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].get("c"), Some("3"));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("a;b\n").is_empty());
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let table = SourceReader::new()
            .read_path("/definitely/not/here/iras.csv")
            .unwrap();
        assert!(table.is_empty());
        assert!(table.headers().is_empty());
    }

    #[test]
    fn test_row_accessors() {
        let table = parse("anio;semana;x\n 2023 ;abc;  \n");
        let row = &table.rows()[0];
        assert_eq!(row.first_int(&["ano", "anio"]), Some(2023));
        assert_eq!(row.int("semana"), None);
        assert_eq!(row.text("x"), None);
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12 "), Some(12.0));
        assert_eq!(parse_number("2,5"), Some(2.5));
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
