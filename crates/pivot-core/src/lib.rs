//! pivot-core: Core library for keyword rank pivot tables
//!
//! This library provides functionality to:
//! - Scan a `<country>/<category>/<file>.csv` data tree
//! - Parse monthly search term exports and anchor files
//! - Build a wide table with one row per search term, a presence column per
//!   category and a rank column per month
//! - Update the table incrementally with new months and new categories
//! - Track per-country schema metadata and processing status

pub mod analyzer;
pub mod combine;
pub mod config;
pub mod error;
pub mod manager;
pub mod merger;
pub mod month;
pub mod parser;
pub mod report;
pub mod scanner;
pub mod schema;
pub mod table;

pub use analyzer::{analyze, ChangeAnalysis, FileClassification, FileKind, FileStatus};
pub use combine::{combine_monthly, CombineResult, DEFAULT_MAX_RANK};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::{StatusReport, TableManager, UpdateOutcome};
pub use merger::{MergeEngine, MergeReport, SkipReason};
pub use month::{parse_filename, parse_token, MonthStamp};
pub use parser::{read_anchor, read_headers, read_monthly, AnchorData, CellValue, MonthlyExport};
pub use report::{TableInfo, UpdateReport};
pub use scanner::{scan_data_root, CountryScan, ScanResult};
pub use schema::{CategoryRecord, CategoryStatus, ColumnKind, ProcessingSummary, Schema, SchemaStore};
pub use table::{WideRow, WideTable};
