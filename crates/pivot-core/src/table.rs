//! The wide pivot table: one row per search term, one column per category
//! and per month

use crate::error::{Error, Result};
use crate::parser::{CellValue, SEARCH_TERM};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A row of the wide table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideRow {
    /// Search term (primary key)
    pub term: String,
    /// One value per column, aligned with `WideTable::columns`
    pub values: Vec<i64>,
}

impl WideRow {
    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<i64> {
        self.values.get(index).copied()
    }
}

/// Dense table keyed by search term
///
/// Every row always holds exactly one value per column; columns added later
/// are back-filled with 0 and rows added later start at 0 everywhere.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WideTable {
    columns: Vec<String>,
    rows: Vec<WideRow>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl WideTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns and rows, rebuilding the search-term index
    ///
    /// Fails when a row width differs from the column count or a search term
    /// repeats.
    pub fn from_parts(columns: Vec<String>, rows: Vec<WideRow>) -> std::result::Result<Self, String> {
        if let Some(row) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(format!(
                "row '{}' has {} values, expected {}",
                row.term,
                row.values.len(),
                columns.len()
            ));
        }
        let mut table = Self {
            columns,
            rows,
            index: HashMap::new(),
        };
        table.rebuild_index()?;
        Ok(table)
    }

    fn rebuild_index(&mut self) -> std::result::Result<(), String> {
        self.index.clear();
        for (pos, row) in self.rows.iter().enumerate() {
            if self.index.insert(row.term.clone(), pos).is_some() {
                return Err(format!("duplicate search term '{}'", row.term));
            }
        }
        Ok(())
    }

    /// Non-key column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order
    pub fn rows(&self) -> &[WideRow] {
        &self.rows
    }

    /// Get the number of columns, including `Search Term`
    pub fn column_count(&self) -> usize {
        self.columns.len() + 1
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// (rows, columns) including the key column
    pub fn shape(&self) -> (usize, usize) {
        (self.row_count(), self.column_count())
    }

    /// Find a column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Check whether a column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Row position of a search term
    pub fn position(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Check whether a search term exists
    pub fn contains_term(&self, term: &str) -> bool {
        self.index.contains_key(term)
    }

    /// Find a row by search term
    pub fn find_row(&self, term: &str) -> Option<&WideRow> {
        self.position(term).map(|pos| &self.rows[pos])
    }

    /// Value at (search term, column)
    pub fn get(&self, term: &str, column: &str) -> Option<i64> {
        let col = self.find_column(column)?;
        self.find_row(term).and_then(|r| r.get(col))
    }

    /// Search terms in row order
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.term.as_str())
    }

    /// Append a column filled with `fill`; an existing column is left
    /// untouched. Returns the column index.
    pub fn add_column(&mut self, name: &str, fill: i64) -> usize {
        if let Some(idx) = self.find_column(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.values.push(fill);
        }
        self.columns.len() - 1
    }

    /// Append a row of zeros for a new search term, or return the existing
    /// row position. The bool is true when a row was added.
    pub fn ensure_row(&mut self, term: &str) -> (usize, bool) {
        if let Some(pos) = self.position(term) {
            return (pos, false);
        }
        let pos = self.rows.len();
        self.rows.push(WideRow {
            term: term.to_string(),
            values: vec![0; self.columns.len()],
        });
        self.index.insert(term.to_string(), pos);
        (pos, true)
    }

    /// Set a cell by row position and column index
    pub fn set(&mut self, row: usize, col: usize, value: i64) {
        self.rows[row].values[col] = value;
    }

    /// Count rows where the column holds `value`
    pub fn count_where(&self, column: &str, value: i64) -> usize {
        match self.find_column(column) {
            Some(col) => self.rows.iter().filter(|r| r.values[col] == value).count(),
            None => 0,
        }
    }

    /// Reorder columns; names not in `order` keep their relative order at
    /// the end. Unknown names in `order` are ignored.
    pub fn reorder_columns(&mut self, order: &[String]) {
        let mut perm: Vec<usize> = order.iter().filter_map(|n| self.find_column(n)).collect();
        let mut placed = vec![false; self.columns.len()];
        perm.retain(|&i| !std::mem::replace(&mut placed[i], true));
        perm.extend((0..self.columns.len()).filter(|&i| !placed[i]));

        if perm.iter().enumerate().all(|(to, &from)| to == from) {
            return;
        }

        self.columns = perm.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            row.values = perm.iter().map(|&i| row.values[i]).collect();
        }
    }

    /// Load a table from a CSV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::read_from(BufReader::new(file), path)
    }

    /// Read a table from CSV; empty cells read as 0
    pub fn read_from<R: Read>(reader: R, path: &Path) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers().map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

        if headers.get(0).map(|h| h.trim_start_matches('\u{feff}')) != Some(SEARCH_TERM) {
            return Err(Error::InvalidTable {
                path: path.to_path_buf(),
                message: format!("first column must be '{}'", SEARCH_TERM),
            });
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut rows = Vec::new();
        for (row_idx, result) in csv_reader.records().enumerate() {
            let record = result.map_err(|e| Error::Csv {
                path: path.to_path_buf(),
                source: e,
            })?;

            let term = record.get(0).unwrap_or_default().to_string();
            let mut values = Vec::with_capacity(columns.len());
            for col in 0..columns.len() {
                let cell = CellValue::parse(record.get(col + 1).unwrap_or_default());
                let value = match cell {
                    CellValue::Empty => 0,
                    other => other.as_rank().ok_or_else(|| Error::InvalidTable {
                        path: path.to_path_buf(),
                        message: format!(
                            "row {} column '{}' is not a number",
                            row_idx + 1,
                            columns[col]
                        ),
                    })?,
                };
                values.push(value);
            }
            rows.push(WideRow { term, values });
        }

        Self::from_parts(columns, rows).map_err(|message| Error::InvalidTable {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Save the table to a CSV file, rewriting it in full
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = File::create(path).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer, path)?;
        writer.flush().map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the table as CSV: `Search Term` then every column in order
    pub fn write_to<W: Write>(&self, writer: W, path: &Path) -> Result<()> {
        let csv_err = |e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer
            .write_record(std::iter::once(SEARCH_TERM).chain(self.columns.iter().map(String::as_str)))
            .map_err(csv_err)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(row.term.clone());
            record.extend(row.values.iter().map(|v| v.to_string()));
            csv_writer.write_record(&record).map_err(csv_err)?;
        }

        csv_writer.flush().map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
