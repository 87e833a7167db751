/*!
 * Error handling for the surveillance engine
 *
 * Dirty rows and missing files are recovered where they occur and never reach
 * this type. What remains are invalid query parameters, I/O failures outside
 * the snapshot rebuild path, export failures and unexpected internal faults.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

use crate::data_types::CodeMismatch;

/// Library result type
pub type Result<T> = std::result::Result<T, EpiError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum EpiError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        context: ErrorContext,
    },

    /// A value that was required to be a facility code is not one
    #[error("Invalid facility code '{value}': {reason}")]
    InvalidFacilityCode {
        value: String,
        reason: CodeMismatch,
    },

    /// Indicator outside the enumerated set
    #[error("Invalid indicator '{value}'")]
    InvalidIndicator {
        value: String,
        valid_options: Vec<String>,
    },

    /// Grouping mode outside the enumerated set
    #[error("Invalid grouping '{value}'")]
    InvalidGroupBy {
        value: String,
        valid_options: Vec<String>,
    },

    /// Any other rejected query parameter
    #[error("Invalid parameter '{name}' = '{value}': {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Unexpected fault while computing an aggregation
    #[error("{operation} failed: {detail}")]
    Aggregation {
        operation: String,
        detail: String,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub facility_code: Option<String>,
}

/// Output format of an exported report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "CSV"),
            ExportFormat::Json => write!(f, "JSON"),
        }
    }
}

impl EpiError {
    /// Create an invalid indicator error listing the accepted values
    pub fn invalid_indicator(value: &str) -> Self {
        Self::InvalidIndicator {
            value: value.to_string(),
            valid_options: crate::data_types::Indicator::ALL
                .iter()
                .map(|i| i.as_code().to_string())
                .collect(),
        }
    }

    /// Create an invalid grouping error listing the accepted values
    pub fn invalid_group_by(value: &str) -> Self {
        Self::InvalidGroupBy {
            value: value.to_string(),
            valid_options: vec!["estab".to_string(), "ris".to_string()],
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(name: &str, value: impl fmt::Display, reason: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attach a file path to I/O and CSV errors
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        match &mut self {
            Self::Io { context, .. } | Self::CsvParse { context, .. } => {
                context.file_path = Some(path.into());
            }
            _ => {}
        }
        self
    }

    /// Whether the error was caused by the caller's input rather than by the engine
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFacilityCode { .. }
                | Self::InvalidIndicator { .. }
                | Self::InvalidGroupBy { .. }
                | Self::InvalidParameter { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidIndicator { valid_options, .. }
            | Self::InvalidGroupBy { valid_options, .. } => {
                format!("{}\n\nValid options: {}", self, valid_options.join(", "))
            }
            Self::InvalidFacilityCode { .. } => {
                format!(
                    "{}\n\nSuggestion: facility codes have six digits, one letter and three digits (e.g. 150140D101)",
                    self
                )
            }
            Self::Io { context: ErrorContext { file_path: Some(path), .. }, .. } => {
                format!("{}\n\nFile: {}", self, path.display())
            }
            Self::Configuration { suggestion: Some(sug), .. }
            | Self::Export { suggestion: Some(sug), .. }
            | Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for EpiError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for EpiError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line() as usize);
        Self::CsvParse {
            message: err.to_string(),
            line,
            context: ErrorContext {
                line_number: line,
                ..Default::default()
            },
        }
    }
}

impl From<CodeMismatch> for EpiError {
    fn from(reason: CodeMismatch) -> Self {
        Self::InvalidFacilityCode {
            value: String::new(),
            reason,
        }
    }
}

impl From<serde_json::Error> for EpiError {
    fn from(err: serde_json::Error) -> Self {
        EpiError::Export {
            message: err.to_string(),
            format: ExportFormat::Json,
            suggestion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_errors_are_client_errors() {
        assert!(EpiError::invalid_indicator("XYZ").is_client_error());
        assert!(EpiError::invalid_group_by("dept").is_client_error());
        let fault = EpiError::Aggregation {
            operation: "summary".to_string(),
            detail: "boom".to_string(),
        };
        assert!(!fault.is_client_error());
    }

    #[test]
    fn test_user_message_lists_indicators() {
        let message = EpiError::invalid_indicator("XYZ").user_message();
        assert!(message.contains("Invalid indicator 'XYZ'"));
        assert!(message.contains("EDA"));
        assert!(message.contains("SOBASMA"));
    }

    #[test]
    fn test_code_mismatch_converts() {
        fn strict(raw: &str) -> Result<crate::data_types::FacilityCode> {
            Ok(crate::data_types::FacilityCode::normalize(raw)?)
        }
        let err = strict("123").unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(
            err,
            EpiError::InvalidFacilityCode { reason: CodeMismatch::TooShort { found: 3 }, .. }
        ));
    }

    #[test]
    fn test_with_path_sets_context() {
        let err: EpiError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        match err.with_path("/data/iras.csv") {
            EpiError::Io { context, .. } => {
                assert_eq!(context.file_path, Some(PathBuf::from("/data/iras.csv")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
