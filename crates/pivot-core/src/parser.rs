//! CSV readers for anchor/combined files and monthly ranking exports
//!
//! Both formats may start with a provider metadata row before the header.
//! The header is the first record that contains a `Search Term` cell; when
//! the first record already has one, no row is skipped.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the key column in every source file and in the pivot table
pub const SEARCH_TERM: &str = "Search Term";

/// Name of the rank column in monthly exports
pub const SEARCH_FREQUENCY_RANK: &str = "Search Frequency Rank";

/// A raw cell value with type detection
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Empty/null cell
    Empty,
}

impl CellValue {
    /// Parse a string into a CellValue, detecting the type
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if let Ok(i) = trimmed.parse::<i64>() {
            return CellValue::Integer(i);
        }

        if let Ok(f) = trimmed.parse::<f64>() {
            return CellValue::Float(f);
        }

        CellValue::String(trimmed.to_string())
    }

    /// Interpret the cell as a rank
    ///
    /// Integers pass through, whole floats ("12.0") are truncated and
    /// thousands separators ("1,234") are accepted. Anything else is None.
    pub fn as_rank(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            CellValue::Float(f) if f.is_finite() => Some(*f as i64),
            CellValue::String(s) if s.contains(',') => s.replace(',', "").parse().ok(),
            _ => None,
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

/// Search term/rank pairs read from one monthly export
#[derive(Debug, Clone, Default)]
pub struct MonthlyExport {
    /// Source file
    pub source_path: PathBuf,
    /// Pairs in file order; duplicates are kept so the last one can win
    pub entries: Vec<(String, i64)>,
    /// Rows dropped for a missing term or an unreadable rank
    pub skipped_rows: usize,
}

impl MonthlyExport {
    /// Distinct search terms in the export
    pub fn terms(&self) -> HashSet<&str> {
        self.entries.iter().map(|(t, _)| t.as_str()).collect()
    }
}

/// Rows of an anchor or combined file
#[derive(Debug, Clone, Default)]
pub struct AnchorData {
    /// Source file
    pub source_path: PathBuf,
    /// Non-key columns in header order
    pub months: Vec<String>,
    /// One entry per unique search term, in file order
    pub rows: Vec<(String, Vec<i64>)>,
    /// Repeated search terms that were dropped (first occurrence kept)
    pub duplicates: usize,
    /// Rows dropped for an empty search term
    pub skipped_rows: usize,
    /// True when no `Search Term` header was found and the first column was used
    pub first_column_key: bool,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(BufReader::new(file))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader)
}

fn clean_header(cell: &str) -> String {
    cell.trim_start_matches('\u{feff}').trim().to_string()
}

/// Read records until the header row, skipping a leading metadata row
///
/// Returns the header cells and, when the first record had to be taken as
/// the header, the already-consumed second record so it is not lost.
fn read_header<R: Read>(
    records: &mut csv::StringRecordsIter<'_, R>,
    path: &Path,
) -> Result<(Vec<String>, Option<csv::StringRecord>)> {
    let mut next = || -> Result<Option<csv::StringRecord>> {
        records
            .next()
            .transpose()
            .map_err(|e| Error::Csv {
                path: path.to_path_buf(),
                source: e,
            })
    };

    let first = next()?.ok_or_else(|| Error::CsvParse {
        path: path.to_path_buf(),
        message: "file is empty".to_string(),
    })?;
    let first_cells: Vec<String> = first.iter().map(clean_header).collect();

    if first_cells.iter().any(|c| c == SEARCH_TERM) {
        return Ok((first_cells, None));
    }

    match next()? {
        Some(second) if second.iter().any(|c| c.contains(SEARCH_TERM)) => {
            debug!(path = %path.display(), "skipped metadata row");
            Ok((second.iter().map(clean_header).collect(), None))
        }
        second => Ok((first_cells, second)),
    }
}

/// Column index of an exact header match, falling back to the first header
/// that contains the name
fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .or_else(|| headers.iter().position(|h| h.contains(name)))
}

/// Read only the header of a source file
pub fn read_headers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv_reader(open(path)?);
    let mut records = reader.records();
    read_header(&mut records, path).map(|(headers, _)| headers)
}

/// Read a monthly export file
pub fn read_monthly<P: AsRef<Path>>(path: P) -> Result<MonthlyExport> {
    let path = path.as_ref();
    read_monthly_from(open(path)?, path)
}

/// Read a monthly export from a string (useful for testing)
pub fn read_monthly_str(content: &str, source_name: &str) -> Result<MonthlyExport> {
    read_monthly_from(content.as_bytes(), Path::new(source_name))
}

/// Read a monthly export from any reader; records are streamed
pub fn read_monthly_from<R: Read>(reader: R, path: &Path) -> Result<MonthlyExport> {
    let mut csv_reader = csv_reader(reader);
    let mut records = csv_reader.records();
    let (headers, pending) = read_header(&mut records, path)?;

    let term_idx = find_column(&headers, SEARCH_TERM).ok_or_else(|| Error::MissingColumn {
        path: path.to_path_buf(),
        column: SEARCH_TERM.to_string(),
    })?;
    let rank_idx =
        find_column(&headers, SEARCH_FREQUENCY_RANK).ok_or_else(|| Error::MissingColumn {
            path: path.to_path_buf(),
            column: SEARCH_FREQUENCY_RANK.to_string(),
        })?;

    let mut export = MonthlyExport {
        source_path: path.to_path_buf(),
        ..Default::default()
    };

    for result in pending.into_iter().map(Ok).chain(records) {
        let record = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

        let term = record.get(term_idx).map(str::trim).unwrap_or_default();
        let rank = record
            .get(rank_idx)
            .map(CellValue::parse)
            .and_then(|c| c.as_rank());

        match rank {
            Some(rank) if !term.is_empty() => export.entries.push((term.to_string(), rank)),
            _ => export.skipped_rows += 1,
        }
    }

    if export.skipped_rows > 0 {
        debug!(
            path = %path.display(),
            skipped = export.skipped_rows,
            "dropped malformed rows"
        );
    }

    Ok(export)
}

/// Read an anchor or combined file
pub fn read_anchor<P: AsRef<Path>>(path: P) -> Result<AnchorData> {
    let path = path.as_ref();
    read_anchor_from(open(path)?, path)
}

/// Read an anchor file from a string (useful for testing)
pub fn read_anchor_str(content: &str, source_name: &str) -> Result<AnchorData> {
    read_anchor_from(content.as_bytes(), Path::new(source_name))
}

/// Read an anchor file from any reader; records are streamed
pub fn read_anchor_from<R: Read>(reader: R, path: &Path) -> Result<AnchorData> {
    let mut csv_reader = csv_reader(reader);
    let mut records = csv_reader.records();
    let (headers, pending) = read_header(&mut records, path)?;

    if headers.is_empty() {
        return Err(Error::CsvParse {
            path: path.to_path_buf(),
            message: "no columns found in CSV".to_string(),
        });
    }

    let (term_idx, first_column_key) = match headers.iter().position(|h| h == SEARCH_TERM) {
        Some(idx) => (idx, false),
        None => {
            warn!(
                path = %path.display(),
                column = %headers[0],
                "no 'Search Term' column, using first column as search terms"
            );
            (0, true)
        }
    };

    let month_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != term_idx).collect();
    let mut data = AnchorData {
        source_path: path.to_path_buf(),
        months: month_idx.iter().map(|&i| headers[i].clone()).collect(),
        first_column_key,
        ..Default::default()
    };

    let mut seen: HashSet<String> = HashSet::new();
    for result in pending.into_iter().map(Ok).chain(records) {
        let record = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

        let term = record.get(term_idx).map(str::trim).unwrap_or_default();
        if term.is_empty() {
            data.skipped_rows += 1;
            continue;
        }
        if !seen.insert(term.to_string()) {
            data.duplicates += 1;
            continue;
        }

        // Missing or non-numeric cells mean "no data" for that month
        let values = month_idx
            .iter()
            .map(|&i| {
                record
                    .get(i)
                    .map(CellValue::parse)
                    .and_then(|c| c.as_rank())
                    .unwrap_or(0)
            })
            .collect();
        data.rows.push((term.to_string(), values));
    }

    if data.duplicates > 0 {
        warn!(
            path = %path.display(),
            duplicates = data.duplicates,
            "dropped repeated search terms, first occurrence kept"
        );
    }

    Ok(data)
}
