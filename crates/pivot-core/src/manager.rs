//! Table manager: one country's table, its schema store and the operations
//! that tie scanning, analysis and merging together
//!
//! Every successful mutation is persisted before the call returns: the
//! schema store writes through on each change and the table file is
//! rewritten in full after each merge.

use crate::analyzer::{self, ChangeAnalysis};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::merger::{MergeEngine, MergeReport};
use crate::month::parse_filename;
use crate::report::{TableInfo, UpdateReport};
use crate::scanner::{CountryScan, ScanResult};
use crate::schema::{ProcessingSummary, Schema, SchemaStore};
use crate::table::WideTable;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of [`TableManager::update`]
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub analysis: ChangeAnalysis,
    /// One report per merge step, in execution order; empty for a dry run
    pub reports: Vec<MergeReport>,
    /// New categories that had no monthly files to merge
    pub skipped_categories: Vec<String>,
    pub dry_run: bool,
}

/// Result of [`TableManager::refresh_status`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// Known categories with files that have not been merged yet
    pub pending_files: Vec<(String, Vec<String>)>,
    /// Scanned categories that are not part of the table
    pub new_categories: Vec<String>,
}

pub struct TableManager {
    config: Config,
    table_path: PathBuf,
    engine: MergeEngine,
}

impl TableManager {
    /// Open a country's table and schema
    ///
    /// A missing table is not an error; the first operation must then be
    /// [`TableManager::create_from_anchor`]. When a table exists the schema
    /// is reconciled with its columns.
    pub fn open(config: Config, country: &str) -> Result<Self> {
        let table_path = config.table_path(country);
        let mut store = SchemaStore::open(config.metadata_path(country), country);

        let table = if table_path.exists() {
            let table = WideTable::load(&table_path)?;
            store.reconcile(&table)?;
            info!(
                country = %country,
                rows = table.row_count(),
                columns = table.column_count(),
                "loaded table"
            );
            Some(table)
        } else {
            debug!(path = %table_path.display(), "no table yet");
            None
        };

        Ok(Self {
            config,
            table_path,
            engine: MergeEngine::new(country, table, store),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn country(&self) -> &str {
        self.engine.country()
    }

    pub fn table(&self) -> Option<&WideTable> {
        self.engine.table()
    }

    pub fn schema(&self) -> &Schema {
        self.engine.schema()
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn has_table(&self) -> bool {
        self.engine.table().is_some()
    }

    /// Write the table and the schema to disk
    pub fn save(&mut self) -> Result<()> {
        if let Some(table) = self.engine.table() {
            table.save(&self.table_path)?;
            info!(path = %self.table_path.display(), rows = table.row_count(), "table saved");
        }
        self.engine.store_mut().save()
    }

    /// Create the table from an anchor file
    pub fn create_from_anchor<P: AsRef<Path>>(&mut self, category: &str, anchor: P) -> Result<MergeReport> {
        let report = self.engine.create_from_anchor(category, anchor)?;
        self.save()?;
        Ok(report)
    }

    /// Add a new category from its monthly files
    pub fn add_category<P: AsRef<Path>>(&mut self, category: &str, files: &[P]) -> Result<MergeReport> {
        let report = self.engine.add_category(category, files)?;
        self.save()?;
        Ok(report)
    }

    /// Add new months for a known category
    pub fn add_months<P: AsRef<Path>>(&mut self, category: &str, files: &[P]) -> Result<MergeReport> {
        let report = self.engine.add_months(category, files)?;
        if report.changed() {
            self.save()?;
        }
        Ok(report)
    }

    fn country_scan<'a>(&self, scan: &'a ScanResult) -> Result<&'a CountryScan> {
        scan.find_country(self.country())
            .ok_or_else(|| Error::CountryNotFound(self.country().to_string()))
    }

    /// Add every monthly file of a category found in the scan; months already
    /// in the table are skipped
    pub fn expand_months(&mut self, scan: &ScanResult, category: &str) -> Result<MergeReport> {
        let files = self.country_scan(scan)?.monthly_files(category);
        if files.is_empty() {
            warn!(category = %category, "no monthly files found");
        }
        self.add_months(category, &files)
    }

    /// Compare the scanned files of this country with the schema
    ///
    /// Besides the file analysis, every scanned category missing from the
    /// schema counts as new, and known categories that are still pending
    /// (or have lost their presence column) and have monthly files are
    /// listed for another merge. This matches what [`TableManager::update`]
    /// will do.
    pub fn analyze(&self, scan: &ScanResult) -> Result<ChangeAnalysis> {
        let country = self.country_scan(scan)?;
        let mut analysis = analyzer::analyze(self.schema(), &country.all_files());

        let diff = self
            .schema()
            .diff(country.category_names(), std::iter::empty::<&str>());
        let mut new_categories: BTreeSet<String> = analysis.new_categories.drain(..).collect();
        new_categories.extend(diff.new_categories);
        analysis.new_categories = new_categories.into_iter().collect();

        analysis.pending_categories = self
            .schema()
            .categories()
            .into_iter()
            .filter(|c| self.needs_category_merge(c) && !country.monthly_files(c).is_empty())
            .collect();

        Ok(analysis)
    }

    /// A known category whose data must go through a full category merge:
    /// it never finished processing, or its presence column is missing
    fn needs_category_merge(&self, category: &str) -> bool {
        let processed = self
            .schema()
            .category(category)
            .is_some_and(|r| r.is_processed());
        let has_column = self.table().is_some_and(|t| t.has_column(category));
        !processed || !has_column
    }

    /// Current state plus what an update would add
    pub fn report(&self, scan: &ScanResult) -> Result<UpdateReport> {
        Ok(UpdateReport::new(self.info(), self.analyze(scan)?))
    }

    /// Merge everything new in the scan
    ///
    /// Processed categories get their new months first. Known categories
    /// that still need a full merge are then re-run through
    /// [`TableManager::add_category`] with all their monthly files, and
    /// finally every scanned category missing from the schema is added.
    /// Months are added before categories so that a month shared by both is
    /// created with the known category's ranks instead of being skipped for
    /// it. With `dry_run` only the analysis is returned.
    pub fn update(&mut self, scan: &ScanResult, dry_run: bool) -> Result<UpdateOutcome> {
        let analysis = self.analyze(scan)?;
        let mut outcome = UpdateOutcome {
            analysis,
            reports: Vec::new(),
            skipped_categories: Vec::new(),
            dry_run,
        };
        if dry_run {
            return Ok(outcome);
        }
        if !self.has_table() {
            return Err(Error::TableMissing(self.country().to_string()));
        }

        let country = self.country_scan(scan)?;
        for category in self.schema().categories() {
            if outcome.analysis.pending_categories.contains(&category) {
                continue;
            }
            let files = outcome.analysis.new_month_files(&category);
            if files.is_empty() {
                continue;
            }
            outcome.reports.push(self.add_months(&category, &files)?);
        }

        for category in outcome.analysis.pending_categories.clone() {
            info!(category = %category, "re-merging pending category");
            let files = country.monthly_files(&category);
            outcome.reports.push(self.add_category(&category, &files)?);
        }

        for category in country.category_names() {
            if self.schema().has_category(category) {
                continue;
            }
            let files = country.monthly_files(category);
            if files.is_empty() {
                warn!(category = %category, "new category has no monthly files, skipping");
                outcome.skipped_categories.push(category.to_string());
                continue;
            }
            outcome.reports.push(self.add_category(category, &files)?);
        }

        info!(steps = outcome.reports.len(), "update complete");
        Ok(outcome)
    }

    /// Record unmerged files of known categories and list unknown categories
    ///
    /// Processed categories keep their status; their available files are
    /// updated so the next update knows what is outstanding. For a processed
    /// category a file whose month is already in the table is not
    /// outstanding: the month came in with the anchor or another merge, and
    /// adding months would skip it.
    pub fn refresh_status(&mut self, scan: &ScanResult) -> Result<StatusReport> {
        let country = self.country_scan(scan)?;
        let mut report = StatusReport::default();

        for category in country.category_names() {
            let (processed_files, is_processed) = match self.schema().category(category) {
                Some(record) => (record.processed_files.clone(), record.is_processed()),
                None => {
                    report.new_categories.push(category.to_string());
                    continue;
                }
            };
            let schema = self.schema();
            let outstanding: Vec<String> = country
                .category_files(category)
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .filter(|name| !processed_files.iter().any(|f| f == name))
                .filter(|name| {
                    !is_processed
                        || !parse_filename(name).is_some_and(|m| schema.has_month(&m.token()))
                })
                .map(str::to_string)
                .collect();

            self.engine
                .store_mut()
                .mark_pending(category, outstanding.clone())?;
            if !outstanding.is_empty() {
                report.pending_files.push((category.to_string(), outstanding));
            }
        }

        Ok(report)
    }

    pub fn processing_summary(&self) -> ProcessingSummary {
        self.schema().processing_summary()
    }

    /// Snapshot of the table and schema
    pub fn info(&self) -> TableInfo {
        let schema = self.schema();
        TableInfo {
            country: self.country().to_string(),
            table_path: self.table_path.clone(),
            metadata_path: self.engine.store().path().to_path_buf(),
            shape: self.table().map(WideTable::shape),
            categories: schema.categories(),
            months: schema.months(),
            keyword_count: self
                .table()
                .map(WideTable::row_count)
                .unwrap_or(schema.keywords.len()),
            last_updated: schema.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan_data_root;
    use crate::schema::CategoryStatus;
    use std::fs;
    use tempfile::TempDir;

    struct Project {
        dir: TempDir,
        config: Config,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = Config {
                data_root: dir.path().join("DATA"),
                output_dir: dir.path().join("outputs"),
                ..Config::default()
            };
            fs::create_dir_all(&config.data_root).unwrap();
            Self { dir, config }
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn monthly(&self, category: &str, date: &str, rows: &[(&str, i64)]) -> PathBuf {
            let mut content = String::from("Reporting Range=Monthly\nSearch Frequency Rank,Search Term\n");
            for (term, rank) in rows {
                content.push_str(&format!("{},{}\n", rank, term));
            }
            self.write(
                &format!("DATA/US/{}/US_Top_search_terms_Simple_Month_{}.csv", category, date),
                &content,
            )
        }

        fn open(&self) -> TableManager {
            TableManager::open(self.config.clone(), "US").unwrap()
        }

        fn anchored(&self) -> TableManager {
            let anchor = self.write(
                "anchor.csv",
                "Search Term,2025-June\nwireless earbuds,5\nphone case,12\n",
            );
            let mut manager = self.open();
            manager.create_from_anchor("Electronics", &anchor).unwrap();
            manager
        }

        fn scan(&self) -> ScanResult {
            scan_data_root(&self.config.data_root).unwrap()
        }
    }

    #[test]
    fn test_create_persists_and_reloads_in_order() {
        let project = Project::new();
        drop(project.anchored());

        assert!(project.config.table_path("US").exists());
        assert!(project.config.metadata_path("US").exists());

        let manager = project.open();
        let table = manager.table().unwrap();
        let terms: Vec<&str> = table.terms().collect();
        assert_eq!(terms, vec!["wireless earbuds", "phone case"]);
        assert_eq!(table.columns(), ["Electronics", "2025-June"]);
        assert_eq!(
            manager.schema().category("Electronics").unwrap().status,
            CategoryStatus::Processed
        );
    }

    #[test]
    fn test_operations_without_table_fail() {
        let project = Project::new();
        let file = project.monthly("Beauty", "2025_06_30", &[("lipstick", 3)]);
        let mut manager = project.open();

        assert!(!manager.has_table());
        assert!(matches!(
            manager.add_category("Beauty", &[file]),
            Err(Error::TableMissing(_))
        ));
    }

    #[test]
    fn test_create_twice_fails() {
        let project = Project::new();
        let mut manager = project.anchored();
        let anchor = project.dir.path().join("anchor.csv");
        assert!(matches!(
            manager.create_from_anchor("Electronics", &anchor),
            Err(Error::TableExists(_))
        ));
    }

    #[test]
    fn test_update_merges_months_then_categories() {
        let project = Project::new();
        let mut manager = project.anchored();
        project.monthly("Electronics", "2025_06_30", &[("wireless earbuds", 5)]);
        project.monthly("Electronics", "2025_07_31", &[("wireless earbuds", 2), ("charger", 8)]);
        project.monthly("Beauty", "2025_07_31", &[("lipstick", 3), ("wireless earbuds", 2)]);
        let scan = project.scan();

        let preview = manager.update(&scan, true).unwrap();
        assert!(preview.reports.is_empty());
        assert_eq!(preview.analysis.new_months, vec!["2025-July"]);
        assert!(!manager.table().unwrap().has_column("2025-July"));

        let outcome = manager.update(&scan, false).unwrap();
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.reports[0].category, "Electronics");
        assert_eq!(outcome.reports[1].category, "Beauty");

        let table = manager.table().unwrap();
        assert_eq!(
            table.columns(),
            ["Beauty", "Electronics", "2025-June", "2025-July"]
        );
        assert_eq!(table.get("wireless earbuds", "2025-July"), Some(2));
        assert_eq!(table.get("wireless earbuds", "Beauty"), Some(1));
        assert_eq!(table.get("phone case", "2025-July"), Some(0));
        assert_eq!(table.get("lipstick", "Electronics"), Some(0));
        assert!(!table.contains_term("charger"));

        let reloaded = project.open();
        assert_eq!(reloaded.table().unwrap().shape(), (3, 5));

        let after = manager.analyze(&project.scan()).unwrap();
        assert!(after.is_current());
    }

    #[test]
    fn test_expand_months_skips_existing() {
        let project = Project::new();
        let mut manager = project.anchored();
        project.monthly("Electronics", "2025_06_30", &[("phone case", 99)]);
        project.monthly("Electronics", "2025_05_31", &[("phone case", 20)]);

        let report = manager.expand_months(&project.scan(), "Electronics").unwrap();

        assert_eq!(report.months_added, vec!["2025-May"]);
        let table = manager.table().unwrap();
        assert_eq!(table.columns(), ["Electronics", "2025-May", "2025-June"]);
        assert_eq!(table.get("phone case", "2025-June"), Some(12));
        assert_eq!(table.get("phone case", "2025-May"), Some(20));
    }

    #[test]
    fn test_refresh_status() {
        let project = Project::new();
        let mut manager = project.anchored();
        project.monthly("Electronics", "2025_07_31", &[("phone case", 4)]);
        project.monthly("Toys", "2025_07_31", &[("lego", 1)]);

        let status = manager.refresh_status(&project.scan()).unwrap();

        assert_eq!(status.new_categories, vec!["Toys"]);
        assert_eq!(status.pending_files.len(), 1);
        assert_eq!(status.pending_files[0].0, "Electronics");

        let record = manager.schema().category("Electronics").unwrap();
        assert!(record.is_processed());
        assert_eq!(
            record.available_files,
            vec!["US_Top_search_terms_Simple_Month_2025_07_31.csv"]
        );
        assert!(!manager.schema().has_category("Toys"));

        let summary = manager.processing_summary();
        assert_eq!(summary.total_categories, 1);
        assert_eq!(summary.completion_percentage, 100.0);
    }

    #[test]
    fn test_update_adds_category_recorded_before_table_save() {
        let project = Project::new();
        drop(project.anchored());
        let mut store = SchemaStore::open(project.config.metadata_path("US"), "US");
        store.add_category("Beauty").unwrap();
        project.monthly("Beauty", "2025_06_30", &[("lipstick", 3)]);

        let mut manager = project.open();
        assert!(!manager.schema().has_category("Beauty"));

        let outcome = manager.update(&project.scan(), false).unwrap();

        assert_eq!(outcome.reports.len(), 1);
        let table = manager.table().unwrap();
        assert_eq!(table.get("lipstick", "Beauty"), Some(1));
        assert_eq!(table.get("lipstick", "2025-June"), Some(3));
    }

    #[test]
    fn test_update_retries_pending_category() {
        let project = Project::new();
        let mut manager = project.anchored();
        let broken = project.write(
            "DATA/US/Toys/US_Top_search_terms_Simple_Month_2025_06_30.csv",
            "Reporting Range=Monthly\nSearch Term\nlego\n",
        );
        let report = manager.add_category("Toys", &[&broken]).unwrap();
        assert!(report.merged_files.is_empty());
        assert!(!manager.schema().category("Toys").unwrap().is_processed());

        project.monthly("Toys", "2025_06_30", &[("lego", 1)]);
        let scan = project.scan();

        let analysis = manager.analyze(&scan).unwrap();
        assert_eq!(analysis.pending_categories, vec!["Toys"]);
        assert!(!analysis.is_current());

        let outcome = manager.update(&scan, false).unwrap();

        assert_eq!(outcome.reports.len(), 1);
        assert!(manager.schema().category("Toys").unwrap().is_processed());
        assert_eq!(manager.table().unwrap().get("lego", "Toys"), Some(1));
        assert!(manager.analyze(&scan).unwrap().is_current());
    }

    #[test]
    fn test_analysis_lists_category_with_known_months_only() {
        let project = Project::new();
        let mut manager = project.anchored();
        project.monthly("Toys", "2025_06_30", &[("lego", 1)]);
        let scan = project.scan();

        let report = manager.report(&scan).unwrap();
        assert_eq!(report.analysis.new_categories, vec!["Toys"]);
        assert!(report.analysis.new_months.is_empty());
        assert!(!report.analysis.is_current());

        let preview = manager.update(&scan, true).unwrap();
        assert!(!preview.analysis.is_current());
        assert!(preview.reports.is_empty());

        let outcome = manager.update(&scan, false).unwrap();
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(manager.table().unwrap().get("lego", "Toys"), Some(1));
    }

    #[test]
    fn test_refresh_status_ignores_months_already_in_table() {
        let project = Project::new();
        let mut manager = project.anchored();
        project.monthly("Electronics", "2025_06_30", &[("phone case", 12)]);

        let status = manager.refresh_status(&project.scan()).unwrap();

        assert!(status.pending_files.is_empty());
        let record = manager.schema().category("Electronics").unwrap();
        assert!(record.available_files.is_empty());
    }

    #[test]
    fn test_corrupt_metadata_is_rebuilt_from_table() {
        let project = Project::new();
        drop(project.anchored());
        fs::write(project.config.metadata_path("US"), "{ not json").unwrap();

        let manager = project.open();

        assert!(manager.schema().has_category("Electronics"));
        assert_eq!(manager.schema().months(), vec!["2025-June"]);
        assert_eq!(manager.schema().keywords.len(), 2);
    }

    #[test]
    fn test_unknown_country() {
        let project = Project::new();
        let manager = project.anchored();
        assert!(matches!(
            manager.analyze(&project.scan()),
            Err(Error::CountryNotFound(_))
        ));
    }

    #[test]
    fn test_info() {
        let project = Project::new();
        let manager = project.anchored();
        let info = manager.info();
        assert_eq!(info.shape, Some((2, 3)));
        assert_eq!(info.categories, vec!["Electronics"]);
        assert_eq!(info.keyword_count, 2);
    }
}
