//! Error types for pivot-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pivot-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse CSV
    #[error("failed to parse CSV '{path}': {message}")]
    CsvParse { path: PathBuf, message: String },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A required column is absent from a source file
    #[error("required column '{column}' not found in '{path}'")]
    MissingColumn { path: PathBuf, column: String },

    /// The persisted pivot table is malformed
    #[error("invalid pivot table '{path}': {message}")]
    InvalidTable { path: PathBuf, message: String },

    /// A table already exists for the country
    #[error("table already exists for '{0}', use add-category instead")]
    TableExists(String),

    /// No table exists for the country yet
    #[error("no table exists for '{0}', create one from an anchor file first")]
    TableMissing(String),

    /// The category is not part of the table
    #[error("category '{0}' not found in table, add the category first")]
    UnknownCategory(String),

    /// The country is not present in the scanned data root
    #[error("country '{0}' not found in data root")]
    CountryNotFound(String),

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
