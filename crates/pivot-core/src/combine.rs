//! Combine single-month exports of one category into an anchor-shaped table
//!
//! The latest month is the base: its terms, in file order, become
//! the rows. Other months are left-joined onto those rows with 0 where a
//! term has no rank.

use crate::error::Result;
use crate::month::{parse_filename, MonthStamp};
use crate::parser::read_monthly;
use crate::table::{WideRow, WideTable};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Ranks above this are dropped by default
pub const DEFAULT_MAX_RANK: i64 = 500_000;

/// Per-month statistics of a combine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthInput {
    pub month: String,
    pub path: PathBuf,
    /// Unique terms read from the file
    pub terms: usize,
    /// Terms dropped for exceeding the rank cutoff
    pub filtered: usize,
}

/// Result of combining monthly exports
#[derive(Debug, Clone)]
pub struct CombineResult {
    /// One column per month, chronological
    pub table: WideTable,
    /// Month whose terms define the rows
    pub base_month: String,
    /// Months that contributed, chronological
    pub months: Vec<MonthInput>,
    /// Files that were skipped, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

impl CombineResult {
    /// Write the combined table as CSV
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.table.save(path)
    }
}

struct MonthData {
    path: PathBuf,
    /// Terms in file order, first occurrence kept
    order: Vec<String>,
    ranks: HashMap<String, i64>,
    filtered: usize,
}

fn load_month(path: &Path, max_rank: i64) -> Result<MonthData> {
    let export = read_monthly(path)?;
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut ranks = HashMap::new();
    let mut filtered = 0;

    for (term, rank) in export.entries {
        if !seen.insert(term.clone()) {
            continue;
        }
        if rank > max_rank {
            filtered += 1;
            continue;
        }
        ranks.insert(term.clone(), rank);
        order.push(term);
    }

    Ok(MonthData {
        path: path.to_path_buf(),
        order,
        ranks,
        filtered,
    })
}

/// Combine monthly export files into one table
///
/// Files whose name carries no month, or that cannot be read, are skipped.
/// When two files carry the same month the later one wins. Returns `None`
/// when no file could be used.
pub fn combine_monthly<P: AsRef<Path>>(files: &[P], max_rank: i64) -> Option<CombineResult> {
    let mut skipped = Vec::new();
    let mut by_month: BTreeMap<MonthStamp, MonthData> = BTreeMap::new();

    for path in files {
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(month) = parse_filename(name) else {
            warn!(file = %path.display(), "could not parse month from filename");
            skipped.push((path.to_path_buf(), "could not parse month from filename".to_string()));
            continue;
        };

        match load_month(path, max_rank) {
            Ok(data) => {
                debug!(month = %month, terms = data.order.len(), filtered = data.filtered, "loaded month");
                if let Some(previous) = by_month.insert(month, data) {
                    warn!(month = %month, replaced = %previous.path.display(), "duplicate month, later file wins");
                    skipped.push((previous.path, format!("superseded for {}", month)));
                }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping file");
                skipped.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    let (&base, base_data) = by_month.iter().next_back()?;

    let columns: Vec<String> = by_month.keys().map(MonthStamp::token).collect();

    let rows: Vec<WideRow> = base_data
        .order
        .iter()
        .map(|term| WideRow {
            term: term.clone(),
            values: by_month
                .values()
                .map(|data| data.ranks.get(term).copied().unwrap_or(0))
                .collect(),
        })
        .collect();

    let table = match WideTable::from_parts(columns, rows) {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "combined table is inconsistent");
            return None;
        }
    };

    info!(base = %base, months = by_month.len(), rows = table.row_count(), "combined monthly files");

    Some(CombineResult {
        table,
        base_month: base.token(),
        months: by_month
            .into_iter()
            .map(|(month, data)| MonthInput {
                month: month.token(),
                terms: data.order.len() + data.filtered,
                filtered: data.filtered,
                path: data.path,
            })
            .collect(),
        skipped,
    })
}
