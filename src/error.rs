//! Error types for the billing exporter.
//!
//! Only conditions that make an export or validation run meaningless end up
//! here. Malformed input values degrade during encoding and malformed file
//! content becomes report entries, neither is an error.

use thiserror::Error;

/// Result type alias for exporter operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Errors that can occur while exporting or validating a batch.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Failed to open, read or write a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader failure that is not tied to a single row
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Format name is not one of the supported families
    #[error("Unknown format '{0}'. Expected one of: bpa, apac, ciha")]
    UnknownFormat(String),

    /// A record type was requested from a format that does not define it
    #[error("No layout registered for {record} in format {format}")]
    LayoutNotFound {
        format: &'static str,
        record: &'static str,
    },

    /// Static layout table violates the positional invariants
    #[error("Invalid layout {layout}: {message}")]
    InvalidLayout {
        layout: &'static str,
        message: String,
    },

    /// Rule table entry rejected at load time
    #[error("Invalid rule for key '{key}': {message}")]
    InvalidRule { key: String, message: String },

    /// Configuration key holds a value its field cannot carry
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidSetting { key: &'static str, message: String },

    /// APAC running numbers do not fit the 12-digit field
    #[error("Invalid APAC numbering: {0}")]
    InvalidApacNumber(String),

    /// Reporting period is not a valid YYYYMM value
    #[error("Invalid reporting period '{0}', expected YYYYMM")]
    InvalidPeriod(String),

    /// Nothing left to write after filtering
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// Required run parameter was not supplied
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}
