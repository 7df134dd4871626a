//! Per-country schema metadata: categories with processing status, months,
//! keywords and column kinds
//!
//! [`Schema`] holds the state and its pure operations. [`SchemaStore`] wraps
//! it with write-through persistence: every mutating call rewrites the JSON
//! document before returning.

use crate::error::{Error, Result};
use crate::month::{is_month_token, sort_tokens};
use crate::table::WideTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Kind of a non-key table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// 0/1 presence flag for a category
    Category,
    /// Rank values for a month
    Month,
}

/// Processing status of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    #[default]
    Pending,
    Processed,
}

/// Bookkeeping for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub name: String,
    pub status: CategoryStatus,
    /// Files that contributed data on the last processing run
    #[serde(default)]
    pub processed_files: Vec<String>,
    /// Files seen in the data root that are not processed yet
    #[serde(default)]
    pub available_files: Vec<String>,
    /// Files that failed on the last processing run
    #[serde(default)]
    pub failed_files: Vec<String>,
    #[serde(default)]
    pub last_processed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Rows whose presence flag is 1
    #[serde(default)]
    pub keyword_count: usize,
}

impl CategoryRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CategoryStatus::Pending,
            processed_files: Vec::new(),
            available_files: Vec::new(),
            failed_files: Vec::new(),
            last_processed: None,
            last_updated: None,
            keyword_count: 0,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == CategoryStatus::Processed
    }
}

/// Candidates not yet present in the schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub new_categories: Vec<String>,
    pub new_months: Vec<String>,
}

/// Counts of categories by processing status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingSummary {
    pub total_categories: usize,
    pub processed: Vec<String>,
    pub pending: Vec<String>,
    pub completion_percentage: f64,
}

/// Persisted description of a country's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub country: String,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryRecord>,
    #[serde(default)]
    pub months: BTreeSet<String>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnKind>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Schema {
    /// Create an empty schema
    pub fn new(country: &str) -> Self {
        let now = Utc::now();
        Self {
            country: country.to_string(),
            categories: BTreeMap::new(),
            months: BTreeSet::new(),
            keywords: BTreeSet::new(),
            column_types: BTreeMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Insert a pending category if absent; an existing record is untouched
    pub fn add_category(&mut self, name: &str) {
        self.categories
            .entry(name.to_string())
            .or_insert_with(|| CategoryRecord::new(name));
        self.column_types
            .insert(name.to_string(), ColumnKind::Category);
    }

    pub fn add_month(&mut self, token: &str) {
        self.months.insert(token.to_string());
        self.column_types.insert(token.to_string(), ColumnKind::Month);
    }

    pub fn add_keywords<I, S>(&mut self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for term in terms {
            let term = term.as_ref();
            if !self.keywords.contains(term) {
                self.keywords.insert(term.to_string());
            }
        }
    }

    /// Set status=processed; the file list and count replace the previous ones
    pub fn mark_processed(&mut self, category: &str, files: Vec<String>, keyword_count: usize) {
        let now = Utc::now();
        let record = self
            .categories
            .entry(category.to_string())
            .or_insert_with(|| CategoryRecord::new(category));
        record.status = CategoryStatus::Processed;
        record.processed_files = files;
        record.failed_files.clear();
        record.last_processed = Some(now);
        record.last_updated = Some(now);
        record.keyword_count = keyword_count;
    }

    /// Record available files; a processed category keeps its status
    pub fn mark_pending(&mut self, category: &str, available_files: Vec<String>) {
        let record = self
            .categories
            .entry(category.to_string())
            .or_insert_with(|| CategoryRecord::new(category));
        if !record.is_processed() {
            record.status = CategoryStatus::Pending;
        }
        record.available_files = available_files;
        record.last_updated = Some(Utc::now());
    }

    /// Record files that failed to merge for a category
    pub fn record_failures(&mut self, category: &str, files: Vec<String>) {
        let record = self
            .categories
            .entry(category.to_string())
            .or_insert_with(|| CategoryRecord::new(category));
        record.failed_files = files;
        record.last_updated = Some(Utc::now());
    }

    pub fn category(&self, name: &str) -> Option<&CategoryRecord> {
        self.categories.get(name)
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }

    pub fn has_month(&self, token: &str) -> bool {
        self.months.contains(token)
    }

    pub fn column_kind(&self, column: &str) -> Option<ColumnKind> {
        self.column_types.get(column).copied()
    }

    /// Categories in alphabetical order
    pub fn categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Months in chronological order, malformed tokens last
    pub fn months(&self) -> Vec<String> {
        let mut months: Vec<String> = self.months.iter().cloned().collect();
        sort_tokens(&mut months);
        months
    }

    /// Canonical column order: categories alphabetically, then months
    /// chronologically. `Search Term` is implicit and always first.
    pub fn column_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self
            .column_types
            .iter()
            .filter(|(_, kind)| **kind == ColumnKind::Category)
            .map(|(name, _)| name.clone())
            .collect();
        order.extend(self.months());
        order
    }

    pub fn pending_categories(&self) -> Vec<String> {
        self.categories
            .values()
            .filter(|r| !r.is_processed())
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn processed_categories(&self) -> Vec<String> {
        self.categories
            .values()
            .filter(|r| r.is_processed())
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn processing_summary(&self) -> ProcessingSummary {
        let processed = self.processed_categories();
        let pending = self.pending_categories();
        let total = self.categories.len();
        let completion_percentage = if total > 0 {
            processed.len() as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        ProcessingSummary {
            total_categories: total,
            processed,
            pending,
            completion_percentage,
        }
    }

    /// Candidates not yet known, categories sorted alphabetically and months
    /// chronologically
    pub fn diff<C, M>(&self, candidate_categories: C, candidate_months: M) -> SchemaDiff
    where
        C: IntoIterator,
        C::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let new_categories: BTreeSet<String> = candidate_categories
            .into_iter()
            .filter(|c| !self.has_category(c.as_ref()))
            .map(|c| c.as_ref().to_string())
            .collect();
        let mut new_months: Vec<String> = candidate_months
            .into_iter()
            .filter(|m| !self.has_month(m.as_ref()))
            .map(|m| m.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        sort_tokens(&mut new_months);

        SchemaDiff {
            new_categories: new_categories.into_iter().collect(),
            new_months,
        }
    }

    /// Re-derive entries from a loaded table's columns
    ///
    /// Columns with a recorded kind keep it; unknown columns are classified
    /// by name (month token or category). Months, categories and column
    /// kinds without a table column are dropped. Returns true when anything
    /// changed.
    pub fn reconcile(&mut self, table: &WideTable) -> bool {
        let before = self.clone();

        for column in table.columns() {
            let kind = self.column_kind(column).unwrap_or_else(|| {
                if is_month_token(column) {
                    ColumnKind::Month
                } else {
                    ColumnKind::Category
                }
            });
            match kind {
                ColumnKind::Category => self.add_category(column),
                ColumnKind::Month => self.add_month(column),
            }
        }

        let stale: Vec<String> = self
            .column_types
            .keys()
            .filter(|c| !table.has_column(c))
            .cloned()
            .collect();
        for column in stale {
            warn!(column = %column, "schema column missing from table, dropping");
            self.column_types.remove(&column);
            self.months.remove(&column);
        }

        let orphaned: Vec<String> = self
            .categories
            .keys()
            .filter(|c| !table.has_column(c))
            .cloned()
            .collect();
        for category in orphaned {
            warn!(category = %category, "category has no table column, dropping");
            self.categories.remove(&category);
        }

        let missing: Vec<&str> = table.terms().filter(|t| !self.keywords.contains(*t)).collect();
        if !missing.is_empty() {
            debug!(count = missing.len(), "keywords recovered from table");
            self.add_keywords(missing);
        }

        let changed = *self != before;
        if changed {
            self.last_updated = Utc::now();
        }
        changed
    }
}

/// Write-through persistence for a [`Schema`]
#[derive(Debug)]
pub struct SchemaStore {
    path: PathBuf,
    schema: Schema,
}

impl SchemaStore {
    /// Open the store at `path`
    ///
    /// A missing file gives an empty schema. A corrupt or unreadable file is
    /// logged and also gives an empty schema; nothing is written until the
    /// first mutation.
    pub fn open<P: AsRef<Path>>(path: P, country: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        let schema = match Self::read(&path) {
            Ok(Some(schema)) => schema,
            Ok(None) => Schema::new(country),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata unreadable, starting from empty state");
                Schema::new(country)
            }
        };
        Self { path, schema }
    }

    fn read(path: &Path) -> Result<Option<Schema>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Location of the JSON document
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Write the full state to disk
    pub fn save(&mut self) -> Result<()> {
        self.schema.last_updated = Utc::now();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(&self.schema)?;
        fs::write(&self.path, content).map_err(|e| Error::FileWrite {
            path: self.path.clone(),
            source: e,
        })?;
        debug!(path = %self.path.display(), "metadata saved");
        Ok(())
    }

    fn update(&mut self, f: impl FnOnce(&mut Schema)) -> Result<()> {
        f(&mut self.schema);
        self.save()
    }

    /// Replace the state with an empty schema
    pub fn reset(&mut self) -> Result<()> {
        let country = self.schema.country.clone();
        info!(country = %country, "metadata reset");
        self.update(|s| *s = Schema::new(&country))
    }

    pub fn add_category(&mut self, name: &str) -> Result<()> {
        self.update(|s| s.add_category(name))
    }

    pub fn add_month(&mut self, token: &str) -> Result<()> {
        self.update(|s| s.add_month(token))
    }

    pub fn add_keywords<I, S>(&mut self, terms: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(|s| s.add_keywords(terms))
    }

    pub fn mark_processed(&mut self, category: &str, files: Vec<String>, keyword_count: usize) -> Result<()> {
        self.update(|s| s.mark_processed(category, files, keyword_count))
    }

    pub fn mark_pending(&mut self, category: &str, available_files: Vec<String>) -> Result<()> {
        self.update(|s| s.mark_pending(category, available_files))
    }

    pub fn record_failures(&mut self, category: &str, files: Vec<String>) -> Result<()> {
        self.update(|s| s.record_failures(category, files))
    }

    /// Reconcile with a loaded table, saving only when something changed
    pub fn reconcile(&mut self, table: &WideTable) -> Result<()> {
        if self.schema.reconcile(table) {
            self.save()?;
        }
        Ok(())
    }
}
