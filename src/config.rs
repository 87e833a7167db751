/*!
 * Runtime configuration
 *
 * Where the source files and the generated report live, and how sources are
 * read during a snapshot rebuild.
 */

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::dataset::SourceLocator;
use crate::reader::DEFAULT_MAX_LINE_LENGTH;
use crate::{constants, EpiError, ExportFormat};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpiConfig {
    /// Writable directory receiving uploaded sources and the generated report
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Read-only directory with the bundled sources
    #[serde(default = "default_seed_dir")]
    pub seed_dir: PathBuf,

    /// File name of the generated notification report
    #[serde(default = "default_report_file_name")]
    pub report_file_name: String,

    /// Default format for exported reports
    #[serde(default)]
    pub report_format: ExportFormat,

    /// Source lines longer than this many bytes are discarded
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Parse the four sources concurrently on rebuild
    #[serde(default = "default_parallel_load")]
    pub parallel_load: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EpiConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            seed_dir: default_seed_dir(),
            report_file_name: default_report_file_name(),
            report_format: ExportFormat::Csv,
            max_line_length: default_max_line_length(),
            parallel_load: default_parallel_load(),
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_uploads_dir() -> PathBuf {
    PathBuf::from("/tmp/uploads")
}

fn default_seed_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_report_file_name() -> String {
    constants::REPORT_FILE.to_string()
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_parallel_load() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EpiConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - `EPI_UPLOAD_DIR` (or `UPLOAD_DIR`): uploads directory
    /// - `EPI_SEED_DIR`: seed data directory
    /// - `EPI_REPORT_FILE`: report file name
    /// - `EPI_REPORT_FORMAT`: "csv" or "json"
    /// - `EPI_MAX_LINE_LENGTH`: number of bytes
    /// - `EPI_PARALLEL_LOAD`: "true" or "false"
    /// - `EPI_LOG_LEVEL`: tracing filter directive
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = var("EPI_UPLOAD_DIR").or_else(|| var("UPLOAD_DIR")) {
            config.uploads_dir = PathBuf::from(val);
        }

        if let Some(val) = var("EPI_SEED_DIR") {
            config.seed_dir = PathBuf::from(val);
        }

        if let Some(val) = var("EPI_REPORT_FILE") {
            config.report_file_name = val;
        }

        if let Some(val) = var("EPI_REPORT_FORMAT") {
            config.report_format = match val.to_lowercase().as_str() {
                "json" => ExportFormat::Json,
                _ => ExportFormat::Csv,
            };
        }

        if let Some(size) = var("EPI_MAX_LINE_LENGTH").and_then(|v| v.trim().parse().ok()) {
            config.max_line_length = size;
        }

        if let Some(val) = var("EPI_PARALLEL_LOAD") {
            config.parallel_load = val.to_lowercase() == "true";
        }

        if let Some(val) = var("EPI_LOG_LEVEL") {
            config.log_level = val;
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| EpiError::from(e).with_path(path))?;
        let config: Self = toml::from_str(&contents).map_err(|e| EpiError::Configuration {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
            suggestion: Some("Check that the file is valid TOML format".to_string()),
        })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| EpiError::Configuration {
            message: format!("Failed to serialize config: {}", e),
            suggestion: None,
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/episurv/config.toml` on Unix-like systems
    /// or `%APPDATA%\episurv\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "episurv")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::from_file(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(error = %e, "ignoring unreadable config file"),
                }
            }
        }

        Self::from_env()
    }

    /// Where the generated notification report is written
    pub fn report_path(&self) -> PathBuf {
        self.uploads_dir.join(&self.report_file_name)
    }

    /// Source directory resolution: uploads first, seed data otherwise
    pub fn locator(&self) -> SourceLocator {
        SourceLocator::prefer_uploads(&self.uploads_dir, &self.seed_dir)
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<EpiConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: EpiConfig) {
    *GLOBAL_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
}

/// Get the global configuration (or load one if not set)
pub fn global_config() -> EpiConfig {
    GLOBAL_CONFIG
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .cloned()
        .unwrap_or_else(EpiConfig::load)
}

/// Clear the global configuration
pub fn clear_global_config() {
    *GLOBAL_CONFIG.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Builder for customizing configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: EpiConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.uploads_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn seed_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.seed_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn report_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.report_file_name = name.into();
        self
    }

    pub fn report_format(mut self, format: ExportFormat) -> Self {
        self.config.report_format = format;
        self
    }

    pub fn max_line_length(mut self, max_line_length: usize) -> Self {
        self.config.max_line_length = max_line_length;
        self
    }

    pub fn parallel_load(mut self, enabled: bool) -> Self {
        self.config.parallel_load = enabled;
        self
    }

    pub fn log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> EpiConfig {
        self.config
    }
}
