/*!
 * Report writers
 *
 * Persists a [`NotificationReport`] either as the semicolon-delimited table
 * the regional offices open in spreadsheets, or as JSON.
 */

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::WriterBuilder;
use tracing::info;

use crate::analytics::NotificationReport;
use crate::data_types::Category;
use crate::{EpiError, ExportFormat, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column header of the facility table
pub const REPORT_COLUMNS: [&str; 10] = [
    "RIS",
    "ESTABLECIMIENTO",
    "RENAES",
    "IRA",
    "NEUMONIAS",
    "SOB.ASMA",
    "EDA ACUOSA",
    "DISENTERICA",
    "FEB",
    "OBSERVACIONES",
];

/// Trait for report writers
pub trait ReportExporter {
    /// Write the report to any byte sink
    fn write_to(&self, report: &NotificationReport, writer: &mut dyn Write) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;

    /// Write the report to a file, creating parent directories as needed
    fn export(&self, report: &NotificationReport, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| EpiError::from(e).with_path(parent))?;
        }
        let file = File::create(path).map_err(|e| EpiError::from(e).with_path(path))?;
        let mut writer = BufWriter::new(file);
        self.write_to(report, &mut writer)?;
        writer.flush()?;

        info!(
            path = %path.display(),
            format = %self.format(),
            facilities = report.rows.len(),
            "wrote notification report"
        );
        Ok(())
    }
}

/// Semicolon table with a metadata header block
pub struct CsvReportExporter {
    /// Field delimiter
    pub delimiter: u8,
    /// Prefix the output with a UTF-8 byte order mark
    pub include_bom: bool,
}

impl Default for CsvReportExporter {
    fn default() -> Self {
        Self {
            delimiter: b';',
            include_bom: true,
        }
    }
}

impl CsvReportExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_bom(mut self, include_bom: bool) -> Self {
        self.include_bom = include_bom;
        self
    }
}

impl ReportExporter for CsvReportExporter {
    fn write_to(&self, report: &NotificationReport, writer: &mut dyn Write) -> Result<()> {
        let sep = char::from(self.delimiter);
        if self.include_bom {
            writer.write_all(UTF8_BOM)?;
        }
        writeln!(
            writer,
            "SEMANA EPIDEMIOLÓGICA {week}{sep}AÑO {year}{sep}UBIGEO {area}{sep}RIS {region}",
            week = report.week,
            year = report.year,
            area = report.area_code.as_deref().unwrap_or(""),
            region = report.region.as_deref().unwrap_or(""),
        )?;
        writeln!(writer, "ESTABLECIMIENTOS NOTIFICADOS{sep}{}", report.notified_count)?;
        writeln!(writer, "ESTABLECIMIENTOS NO NOTIFICADOS{sep}{}", report.non_notified_count)?;
        writeln!(writer)?;

        let mut table = WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(writer);
        table.write_record(REPORT_COLUMNS)?;
        for row in &report.rows {
            let mut record = vec![row.region.clone(), row.name.clone(), row.code.clone()];
            record.extend(Category::ALL.iter().map(|c| row.counts.get(*c).to_string()));
            record.push(row.observations.clone());
            table.write_record(&record)?;
        }
        table.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// JSON writer for reports
pub struct JsonReportExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
}

impl Default for JsonReportExporter {
    fn default() -> Self {
        Self { pretty_print: true }
    }
}

impl JsonReportExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }
}

impl ReportExporter for JsonReportExporter {
    fn write_to(&self, report: &NotificationReport, writer: &mut dyn Write) -> Result<()> {
        if self.pretty_print {
            serde_json::to_writer_pretty(&mut *writer, report)?;
        } else {
            serde_json::to_writer(&mut *writer, report)?;
        }
        writeln!(writer)?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}

/// Pick the default writer for a format
pub fn exporter_for(format: ExportFormat) -> Box<dyn ReportExporter> {
    match format {
        ExportFormat::Csv => Box::new(CsvReportExporter::new()),
        ExportFormat::Json => Box::new(JsonReportExporter::new()),
    }
}

impl NotificationReport {
    /// Write the report to `path` in the given format
    pub fn export<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<()> {
        exporter_for(format).export(self, path.as_ref())
    }

    /// The semicolon report as text, without byte order mark
    pub fn to_csv_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        CsvReportExporter::new()
            .with_bom(false)
            .write_to(self, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| EpiError::Export {
            message: e.to_string(),
            format: ExportFormat::Csv,
            suggestion: None,
        })
    }
}
