//! Merge engine: the only code that mutates the wide table
//!
//! Every operation updates the table and the schema store together. Files
//! are processed one at a time; a file that fails to parse or read is
//! logged, recorded in the [`MergeReport`] and skipped without touching the
//! table.

use crate::error::{Error, Result};
use crate::month::parse_filename;
use crate::parser::{read_anchor, read_monthly, MonthlyExport};
use crate::schema::{Schema, SchemaStore};
use crate::table::WideTable;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Why a file did not contribute to a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The filename does not encode a month
    UnparseableName,
    /// The month column already exists (add-months only)
    MonthExists(String),
    /// Reading or parsing the file failed
    ReadFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnparseableName => write!(f, "could not parse month from filename"),
            SkipReason::MonthExists(m) => write!(f, "month {} already exists", m),
            SkipReason::ReadFailed(e) => write!(f, "{}", e),
        }
    }
}

/// Outcome of a merge operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Category the operation targeted
    pub category: String,
    /// Files that contributed data, in processing order
    pub merged_files: Vec<PathBuf>,
    /// Files that were skipped, with the reason
    pub skipped_files: Vec<(PathBuf, SkipReason)>,
    /// Month columns created by this operation
    pub months_added: Vec<String>,
    /// Rows created by this operation
    pub rows_added: usize,
    /// Malformed source rows dropped across all merged files
    pub rows_skipped: usize,
    /// Table shape (rows, columns) after the operation
    pub shape: (usize, usize),
}

impl MergeReport {
    fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            ..Default::default()
        }
    }

    fn skip(&mut self, path: &Path, reason: SkipReason) {
        warn!(file = %path.display(), reason = %reason, "skipping file");
        self.skipped_files.push((path.to_path_buf(), reason));
    }

    /// True when the operation changed the table structure or contents
    pub fn changed(&self) -> bool {
        !self.merged_files.is_empty()
    }
}

/// Owner of the wide table and its schema store
#[derive(Debug)]
pub struct MergeEngine {
    country: String,
    table: Option<WideTable>,
    store: SchemaStore,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl MergeEngine {
    pub fn new(country: &str, table: Option<WideTable>, store: SchemaStore) -> Self {
        Self {
            country: country.to_string(),
            table,
            store,
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn table(&self) -> Option<&WideTable> {
        self.table.as_ref()
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SchemaStore {
        &mut self.store
    }

    fn table_mut(&mut self) -> Result<&mut WideTable> {
        let country = &self.country;
        self.table
            .as_mut()
            .ok_or_else(|| Error::TableMissing(country.clone()))
    }

    /// Create the table from an anchor file
    ///
    /// Rows keep the anchor's order. Every anchor row belongs to the anchor
    /// category, and every non-key column becomes a month.
    pub fn create_from_anchor<P: AsRef<Path>>(&mut self, category: &str, anchor_path: P) -> Result<MergeReport> {
        if self.table.is_some() {
            return Err(Error::TableExists(self.country.clone()));
        }
        let anchor_path = anchor_path.as_ref();
        info!(category = %category, file = %anchor_path.display(), "creating table from anchor");

        let anchor = read_anchor(anchor_path)?;

        let mut table = WideTable::new();
        let presence = table.add_column(category, 0);
        let month_cols: Vec<usize> = anchor.months.iter().map(|m| table.add_column(m, 0)).collect();
        for (term, values) in &anchor.rows {
            let (pos, _) = table.ensure_row(term);
            table.set(pos, presence, 1);
            for (&col, &value) in month_cols.iter().zip(values) {
                table.set(pos, col, value);
            }
        }

        self.store.reset()?;
        for month in &anchor.months {
            self.store.add_month(month)?;
        }
        self.store.add_category(category)?;
        self.store.add_keywords(table.terms())?;
        self.store
            .mark_processed(category, vec![file_name(anchor_path)], table.row_count())?;

        table.reorder_columns(&self.store.schema().column_order());

        let mut report = MergeReport::new(category);
        report.merged_files.push(anchor_path.to_path_buf());
        report.months_added = self.store.schema().months();
        report.rows_added = table.row_count();
        report.rows_skipped = anchor.skipped_rows + anchor.duplicates;
        report.shape = table.shape();
        self.table = Some(table);

        info!(
            rows = report.shape.0,
            columns = report.shape.1,
            months = report.months_added.len(),
            "table created"
        );
        Ok(report)
    }

    /// Add a category's monthly files to the table
    ///
    /// Existing terms get presence 1 and the file's rank for its month (a
    /// later file for the same term and month overwrites). Unknown terms
    /// become new rows.
    pub fn add_category<P: AsRef<Path>>(&mut self, category: &str, files: &[P]) -> Result<MergeReport> {
        let table = self.table_mut()?;
        info!(category = %category, files = files.len(), "adding category");

        let presence = table.add_column(category, 0);
        self.store.add_category(category)?;

        let mut report = MergeReport::new(category);
        for path in files {
            let path = path.as_ref();
            let Some((token, export)) = load_month_file(path, &mut report) else {
                continue;
            };

            let table = self.table_mut()?;
            let month_col = match table.find_column(&token) {
                Some(col) => col,
                None => {
                    let col = table.add_column(&token, 0);
                    report.months_added.push(token.clone());
                    debug!(month = %token, "added month column");
                    col
                }
            };

            let mut new_terms = Vec::new();
            for (term, rank) in &export.entries {
                let (pos, added) = table.ensure_row(term);
                if added {
                    new_terms.push(term.as_str());
                }
                table.set(pos, presence, 1);
                table.set(pos, month_col, *rank);
            }
            report.rows_added += new_terms.len();
            report.rows_skipped += export.skipped_rows;

            if !self.store.schema().has_month(&token) {
                self.store.add_month(&token)?;
            }
            self.store.add_keywords(export.entries.iter().map(|(t, _)| t))?;

            if !new_terms.is_empty() {
                info!(month = %token, new_keywords = new_terms.len(), "added new keywords");
            }
            report.merged_files.push(path.to_path_buf());
        }

        let table = self.table_mut()?;
        let keyword_count = table.count_where(category, 1);
        if report.merged_files.is_empty() {
            let failed: Vec<String> = report.skipped_files.iter().map(|(p, _)| file_name(p)).collect();
            warn!(category = %category, "no files merged, category left pending");
            self.store.mark_pending(
                category,
                files.iter().map(|p| file_name(p.as_ref())).collect(),
            )?;
            self.store.record_failures(category, failed)?;
        } else {
            let processed = report.merged_files.iter().map(|p| file_name(p)).collect();
            self.store.mark_processed(category, processed, keyword_count)?;
        }

        self.canonicalize();
        report.shape = self.table.as_ref().map(WideTable::shape).unwrap_or_default();
        info!(
            category = %category,
            merged = report.merged_files.len(),
            skipped = report.skipped_files.len(),
            rows_added = report.rows_added,
            "category added"
        );
        Ok(report)
    }

    /// Add new month columns for an existing category
    ///
    /// Months that already exist are skipped, not overwritten. Only rows
    /// already in the table receive ranks; no rows are created.
    pub fn add_months<P: AsRef<Path>>(&mut self, category: &str, files: &[P]) -> Result<MergeReport> {
        if self.table.is_none() {
            return Err(Error::TableMissing(self.country.clone()));
        }
        if !self.store.schema().has_category(category) {
            return Err(Error::UnknownCategory(category.to_string()));
        }
        info!(category = %category, files = files.len(), "adding months");

        let mut report = MergeReport::new(category);
        for path in files {
            let path = path.as_ref();
            let Some(stamp) = parse_filename(&file_name(path)) else {
                report.skip(path, SkipReason::UnparseableName);
                continue;
            };
            let token = stamp.token();
            if self.table.as_ref().is_some_and(|t| t.has_column(&token)) {
                debug!(month = %token, "month already exists");
                report.skipped_files.push((path.to_path_buf(), SkipReason::MonthExists(token)));
                continue;
            }

            let export = match read_monthly(path) {
                Ok(export) => export,
                Err(e) => {
                    report.skip(path, SkipReason::ReadFailed(e.to_string()));
                    continue;
                }
            };

            let table = self.table_mut()?;
            let col = table.add_column(&token, 0);
            let mut matched = 0;
            for (term, rank) in &export.entries {
                if let Some(pos) = table.position(term) {
                    table.set(pos, col, *rank);
                    matched += 1;
                }
            }
            report.rows_skipped += export.skipped_rows;
            self.store.add_month(&token)?;

            info!(month = %token, data_points = matched, "added month");
            report.months_added.push(token);
            report.merged_files.push(path.to_path_buf());
        }

        if report.changed() {
            let mut processed = self
                .store
                .schema()
                .category(category)
                .map(|r| r.processed_files.clone())
                .unwrap_or_default();
            for path in &report.merged_files {
                let name = file_name(path);
                if !processed.contains(&name) {
                    processed.push(name);
                }
            }
            let keyword_count = self.table_mut()?.count_where(category, 1);
            self.store.mark_processed(category, processed, keyword_count)?;
            self.canonicalize();
        } else {
            info!(category = %category, "no new months were added");
        }

        report.shape = self.table.as_ref().map(WideTable::shape).unwrap_or_default();
        Ok(report)
    }

    /// Reorder columns to `Search Term`, categories A-Z, months by date
    fn canonicalize(&mut self) {
        let order = self.store.schema().column_order();
        if let Some(table) = self.table.as_mut() {
            table.reorder_columns(&order);
        }
    }
}

/// Parse the month from the filename, then read the export
fn load_month_file(path: &Path, report: &mut MergeReport) -> Option<(String, MonthlyExport)> {
    let Some(stamp) = parse_filename(&file_name(path)) else {
        report.skip(path, SkipReason::UnparseableName);
        return None;
    };
    match read_monthly(path) {
        Ok(export) => Some((stamp.token(), export)),
        Err(e) => {
            report.skip(path, SkipReason::ReadFailed(e.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: MergeEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = SchemaStore::open(dir.path().join("us_structure.json"), "US");
            let engine = MergeEngine::new("US", None, store);
            Self { dir, engine }
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn monthly(&self, name: &str, rows: &[(&str, i64)]) -> PathBuf {
            let mut content = String::from("Reporting Range=Monthly\nSearch Frequency Rank,Search Term\n");
            for (term, rank) in rows {
                content.push_str(&format!("{},{}\n", rank, term));
            }
            self.write(name, &content)
        }

        fn with_anchor(mut self) -> Self {
            let anchor = self.write(
                "anchor.csv",
                "Search Term,2025-June\nwireless earbuds,5\nphone case,12\n",
            );
            self.engine.create_from_anchor("Electronics", &anchor).unwrap();
            self
        }

        fn table(&self) -> &WideTable {
            self.engine.table().unwrap()
        }
    }

    fn row(table: &WideTable, term: &str) -> Vec<i64> {
        table.find_row(term).unwrap().values.clone()
    }

    #[test]
    fn test_create_from_anchor() {
        let fx = Fixture::new().with_anchor();
        let table = fx.table();

        assert_eq!(table.columns(), &["Electronics", "2025-June"]);
        let terms: Vec<&str> = table.terms().collect();
        assert_eq!(terms, vec!["wireless earbuds", "phone case"]);
        assert_eq!(row(table, "wireless earbuds"), vec![1, 5]);
        assert_eq!(row(table, "phone case"), vec![1, 12]);

        let record = fx.engine.schema().category("Electronics").unwrap();
        assert!(record.is_processed());
        assert_eq!(record.processed_files, vec!["anchor.csv"]);
        assert_eq!(record.keyword_count, 2);
    }

    #[test]
    fn test_create_twice_fails() {
        let mut fx = Fixture::new().with_anchor();
        let anchor = fx.dir.path().join("anchor.csv");
        let err = fx.engine.create_from_anchor("Beauty", &anchor).unwrap_err();
        assert!(matches!(err, Error::TableExists(_)));
    }

    #[test]
    fn test_operations_require_table() {
        let mut fx = Fixture::new();
        let file = fx.monthly("US_Top_search_terms_Simple_Month_2025_06_30.csv", &[("mug", 1)]);
        assert!(matches!(
            fx.engine.add_category("Beauty", &[&file]),
            Err(Error::TableMissing(_))
        ));
        assert!(matches!(
            fx.engine.add_months("Beauty", &[&file]),
            Err(Error::TableMissing(_))
        ));
    }

    #[test]
    fn test_add_category_scenario() {
        let mut fx = Fixture::new().with_anchor();
        let file = fx.monthly("US_Top_search_terms_Simple_Month_2025_06_30.csv", &[("lipstick", 3)]);

        let report = fx.engine.add_category("Beauty", &[&file]).unwrap();
        let table = fx.table();

        assert_eq!(table.columns(), &["Beauty", "Electronics", "2025-June"]);
        assert_eq!(row(table, "wireless earbuds"), vec![0, 1, 5]);
        assert_eq!(row(table, "phone case"), vec![0, 1, 12]);
        assert_eq!(row(table, "lipstick"), vec![1, 0, 3]);
        assert_eq!(report.rows_added, 1);
        assert!(report.months_added.is_empty());

        let record = fx.engine.schema().category("Beauty").unwrap();
        assert!(record.is_processed());
        assert_eq!(record.keyword_count, 1);
    }

    #[test]
    fn test_add_category_overwrites_existing_month() {
        let mut fx = Fixture::new().with_anchor();
        let file = fx.monthly(
            "US_Top_search_terms_Simple_Month_2025_06_30.csv",
            &[("phone case", 2), ("phone case", 4)],
        );

        fx.engine.add_category("Accessories", &[&file]).unwrap();
        let table = fx.table();
        assert_eq!(table.get("phone case", "2025-June"), Some(4));
        assert_eq!(table.get("phone case", "Accessories"), Some(1));
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_add_category_new_month_and_skips() {
        let mut fx = Fixture::new().with_anchor();
        let good = fx.monthly("US_Top_search_terms_Simple_Month_2025_07_31.csv", &[("mug", 9)]);
        let bad_name = fx.monthly("notes.csv", &[("lamp", 1)]);
        let broken = fx.write(
            "US_Top_search_terms_Simple_Month_2025_08_31.csv",
            "meta\nSearch Term,Clicks\nmug,1\n",
        );
        let missing = fx.dir.path().join("US_Top_search_terms_Simple_Month_2025_09_30.csv");

        let report = fx
            .engine
            .add_category("Home", &[&bad_name, &good, &broken, &missing])
            .unwrap();
        let table = fx.table();

        assert_eq!(report.merged_files, vec![good]);
        assert_eq!(report.skipped_files.len(), 3);
        assert_eq!(report.months_added, vec!["2025-July"]);
        assert_eq!(table.columns(), &["Electronics", "Home", "2025-June", "2025-July"]);
        assert_eq!(row(table, "mug"), vec![0, 1, 0, 9]);
        assert_eq!(row(table, "phone case"), vec![1, 0, 12, 0]);
        assert!(!table.has_column("2025-August"));
    }

    #[test]
    fn test_add_category_with_no_usable_files_stays_pending() {
        let mut fx = Fixture::new().with_anchor();
        let bad = fx.monthly("notes.csv", &[("lamp", 1)]);

        let report = fx.engine.add_category("Garden", &[&bad]).unwrap();
        assert!(!report.changed());

        let record = fx.engine.schema().category("Garden").unwrap();
        assert!(!record.is_processed());
        assert_eq!(record.failed_files, vec!["notes.csv"]);
        assert!(fx.table().rows().iter().all(|r| r.values.len() == 3));
    }

    #[test]
    fn test_add_category_never_shrinks() {
        let mut fx = Fixture::new().with_anchor();
        let before = fx.table().row_count();
        let file = fx.monthly(
            "US_Top_search_terms_Simple_Month_2025_06_30.csv",
            &[("phone case", 1)],
        );
        fx.engine.add_category("Beauty", &[&file]).unwrap();
        assert_eq!(fx.table().row_count(), before);
    }

    #[test]
    fn test_add_months_scenario() {
        let mut fx = Fixture::new().with_anchor();
        let beauty = fx.monthly("US_Top_search_terms_Simple_Month_2025_06_30.csv", &[("lipstick", 3)]);
        fx.engine.add_category("Beauty", &[&beauty]).unwrap();

        let july = fx.monthly(
            "US_Top_search_terms_Simple_Month_2025_07_31.csv",
            &[("wireless earbuds", 2), ("brand new term", 1)],
        );
        let report = fx.engine.add_months("Electronics", &[&july]).unwrap();
        let table = fx.table();

        assert_eq!(report.months_added, vec!["2025-July"]);
        assert_eq!(
            table.columns(),
            &["Beauty", "Electronics", "2025-June", "2025-July"]
        );
        assert_eq!(table.get("wireless earbuds", "2025-July"), Some(2));
        assert_eq!(table.get("phone case", "2025-July"), Some(0));
        assert_eq!(table.get("lipstick", "2025-July"), Some(0));
        assert!(!table.contains_term("brand new term"));

        let record = fx.engine.schema().category("Electronics").unwrap();
        assert!(record
            .processed_files
            .contains(&"US_Top_search_terms_Simple_Month_2025_07_31.csv".to_string()));
    }

    #[test]
    fn test_add_months_is_idempotent() {
        let mut once = Fixture::new().with_anchor();
        let file = once.monthly(
            "US_Top_search_terms_Simple_Month_2025_07_31.csv",
            &[("phone case", 8)],
        );
        once.engine.add_months("Electronics", &[&file]).unwrap();

        let mut twice = Fixture::new().with_anchor();
        let file2 = twice.monthly(
            "US_Top_search_terms_Simple_Month_2025_07_31.csv",
            &[("phone case", 8)],
        );
        let report = twice.engine.add_months("Electronics", &[&file2, &file2]).unwrap();

        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(once.table().columns(), twice.table().columns());
        assert_eq!(once.table().rows(), twice.table().rows());
    }

    #[test]
    fn test_add_months_does_not_overwrite_existing_month() {
        let mut fx = Fixture::new().with_anchor();
        let june = fx.monthly("2025-June.csv", &[("phone case", 99)]);
        let report = fx.engine.add_months("Electronics", &[&june]).unwrap();

        assert!(!report.changed());
        assert_eq!(fx.table().get("phone case", "2025-June"), Some(12));
    }

    #[test]
    fn test_add_months_unknown_category() {
        let mut fx = Fixture::new().with_anchor();
        let file = fx.monthly("2025-July.csv", &[("mug", 1)]);
        assert!(matches!(
            fx.engine.add_months("Toys", &[&file]),
            Err(Error::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_every_row_has_every_column() {
        let mut fx = Fixture::new().with_anchor();
        let a = fx.monthly("US_Top_search_terms_Simple_Month_2025_05_31.csv", &[("x", 1), ("y", 2)]);
        let b = fx.monthly("US_Top_search_terms_Simple_Month_2025_08_31.csv", &[("z", 3)]);
        fx.engine.add_category("Beauty", &[&a]).unwrap();
        fx.engine.add_category("Toys", &[&b]).unwrap();
        fx.engine.add_months("Beauty", &[&b]).unwrap();

        let table = fx.table();
        let width = table.columns().len();
        assert!(table.rows().iter().all(|r| r.values.len() == width));
        assert_eq!(
            table.columns(),
            &["Beauty", "Electronics", "Toys", "2025-May", "2025-June", "2025-August"]
        );
    }
}
