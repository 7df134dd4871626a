//! Change analysis: compare available source files with the schema
//!
//! Analysis is a pure function of the schema and the file list. It reads
//! files but never writes, so it can be re-run between merges as a dry run.

use crate::month::{is_month_token, is_monthly_filename, parse_filename, sort_tokens};
use crate::parser::{read_headers, read_monthly, SEARCH_TERM};
use crate::schema::Schema;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Shape of a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// One month for one category (raw provider export)
    Monthly,
    /// Several month columns in one file (anchor-shaped)
    Combined,
}

/// What a file would contribute to the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Carries at least one month the schema lacks
    NewMonth,
    /// Belongs to a category the schema lacks
    NewCategory,
    /// Nothing new
    Known,
    /// Month or headers could not be determined
    Unreadable,
}

/// Classification of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileClassification {
    pub path: PathBuf,
    /// Parent directory name
    pub category: Option<String>,
    pub kind: FileKind,
    /// Months the file carries
    pub months: Vec<String>,
    /// Months the file carries that the schema lacks
    pub new_months: Vec<String>,
    pub status: FileStatus,
}

/// Result of comparing available files with the schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeAnalysis {
    /// New month tokens, chronological
    pub new_months: Vec<String>,
    /// New categories, alphabetical
    pub new_categories: Vec<String>,
    /// Known categories still pending whose files can be merged again,
    /// alphabetical
    pub pending_categories: Vec<String>,
    /// Advisory estimate of search terms not yet in the table
    pub new_keywords_count: usize,
    /// New month -> categories whose files carry it
    pub month_sources: BTreeMap<String, BTreeSet<String>>,
    /// Per-file classification, in input order
    pub files: Vec<FileClassification>,
}

impl ChangeAnalysis {
    /// True when there is nothing new to merge
    pub fn is_current(&self) -> bool {
        self.new_months.is_empty()
            && self.new_categories.is_empty()
            && self.pending_categories.is_empty()
    }

    /// Files carrying new months for a category
    pub fn new_month_files(&self, category: &str) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| {
                f.kind == FileKind::Monthly
                    && f.status == FileStatus::NewMonth
                    && f.category.as_deref() == Some(category)
            })
            .map(|f| f.path.clone())
            .collect()
    }

    /// Files belonging to a new category
    pub fn category_files(&self, category: &str) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.category.as_deref() == Some(category))
            .map(|f| f.path.clone())
            .collect()
    }
}

/// Category of a file: the name of its parent directory
pub fn category_of(path: &Path) -> Option<String> {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Classify available files against the schema
pub fn analyze<P: AsRef<Path>>(schema: &Schema, files: &[P]) -> ChangeAnalysis {
    let mut analysis = ChangeAnalysis::default();
    let mut new_months: BTreeSet<String> = BTreeSet::new();
    let mut new_categories: BTreeSet<String> = BTreeSet::new();
    let mut candidate_terms: HashSet<String> = HashSet::new();

    for path in files {
        let path = path.as_ref();
        let category = category_of(path);
        let name = file_name(path);

        let mut entry = if is_monthly_filename(name) {
            classify_monthly(path, name)
        } else {
            classify_combined(path)
        };
        entry.category = category.clone();

        entry.new_months = entry
            .months
            .iter()
            .filter(|m| !schema.has_month(m))
            .cloned()
            .collect();
        for month in &entry.new_months {
            new_months.insert(month.clone());
            if let Some(category) = &category {
                analysis
                    .month_sources
                    .entry(month.clone())
                    .or_default()
                    .insert(category.clone());
            }
        }

        let category_is_new = entry.kind == FileKind::Combined
            && category.as_deref().is_some_and(|c| !schema.has_category(c));
        if category_is_new {
            if let Some(category) = &category {
                new_categories.insert(category.clone());
            }
        }

        if entry.status != FileStatus::Unreadable {
            entry.status = if category_is_new {
                FileStatus::NewCategory
            } else if !entry.new_months.is_empty() {
                FileStatus::NewMonth
            } else {
                FileStatus::Known
            };
        }

        if entry.kind == FileKind::Monthly {
            match read_monthly(path) {
                Ok(export) => candidate_terms.extend(
                    export
                        .entries
                        .into_iter()
                        .map(|(t, _)| t)
                        .filter(|t| !schema.keywords.contains(t)),
                ),
                Err(e) => debug!(file = %path.display(), error = %e, "keyword estimate skipped file"),
            }
        }

        analysis.files.push(entry);
    }

    analysis.new_months = new_months.into_iter().collect();
    sort_tokens(&mut analysis.new_months);
    analysis.new_categories = new_categories.into_iter().collect();
    analysis.new_keywords_count = candidate_terms.len();
    analysis
}

fn classify_monthly(path: &Path, name: &str) -> FileClassification {
    let month = parse_filename(name).map(|m| m.token());
    if month.is_none() {
        warn!(file = %path.display(), "could not extract month from filename");
    }
    FileClassification {
        path: path.to_path_buf(),
        category: None,
        kind: FileKind::Monthly,
        status: if month.is_some() {
            FileStatus::Known
        } else {
            FileStatus::Unreadable
        },
        months: month.into_iter().collect(),
        new_months: Vec::new(),
    }
}

fn classify_combined(path: &Path) -> FileClassification {
    let (months, status) = match read_headers(path) {
        Ok(headers) => (
            headers
                .into_iter()
                .filter(|h| h != SEARCH_TERM && is_month_token(h))
                .collect(),
            FileStatus::Known,
        ),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "could not read headers");
            (Vec::new(), FileStatus::Unreadable)
        }
    };
    FileClassification {
        path: path.to_path_buf(),
        category: None,
        kind: FileKind::Combined,
        months,
        new_months: Vec::new(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn schema() -> Schema {
        let mut schema = Schema::new("US");
        schema.add_category("Electronics");
        schema.add_month("2025-June");
        schema.add_keywords(["wireless earbuds", "phone case"]);
        schema
    }

    #[test]
    fn test_new_month_for_existing_category() {
        let dir = TempDir::new().unwrap();
        let july = write(
            dir.path(),
            "US/Electronics/US_Top_search_terms_Simple_Month_2025_07_31.csv",
            "meta\nSearch Term,Search Frequency Rank\nwireless earbuds,2\ncharger,9\n",
        );
        let june = write(
            dir.path(),
            "US/Electronics/US_Top_search_terms_Simple_Month_2025_06_30.csv",
            "meta\nSearch Term,Search Frequency Rank\nphone case,1\n",
        );

        let analysis = analyze(&schema(), &[&june, &july]);

        assert_eq!(analysis.new_months, vec!["2025-July"]);
        assert!(analysis.new_categories.is_empty());
        assert_eq!(analysis.new_keywords_count, 1);
        assert_eq!(analysis.files[0].status, FileStatus::Known);
        assert_eq!(analysis.files[1].status, FileStatus::NewMonth);
        assert_eq!(analysis.new_month_files("Electronics"), vec![july]);
        assert_eq!(
            analysis.month_sources["2025-July"],
            BTreeSet::from(["Electronics".to_string()])
        );
    }

    #[test]
    fn test_combined_file_of_new_category() {
        let dir = TempDir::new().unwrap();
        let combined = write(
            dir.path(),
            "US/Beauty/monthly_rankings_combined.csv",
            "Search Term,2025-May,2025-June\nlipstick,4,3\n",
        );

        let analysis = analyze(&schema(), &[&combined]);

        assert_eq!(analysis.new_categories, vec!["Beauty"]);
        assert_eq!(analysis.new_months, vec!["2025-May"]);
        assert_eq!(analysis.files[0].kind, FileKind::Combined);
        assert_eq!(analysis.files[0].status, FileStatus::NewCategory);
        assert_eq!(analysis.new_keywords_count, 0);
    }

    #[test]
    fn test_unparseable_monthly_name() {
        let dir = TempDir::new().unwrap();
        let bad = write(
            dir.path(),
            "US/Electronics/US_Top_search_terms_Simple_Month_2025_13_31.csv",
            "meta\nSearch Term,Search Frequency Rank\nmug,1\n",
        );

        let analysis = analyze(&schema(), &[&bad]);
        assert_eq!(analysis.files[0].status, FileStatus::Unreadable);
        assert!(analysis.new_months.is_empty());
    }

    #[test]
    fn test_repeated_analysis_is_identical() {
        let dir = TempDir::new().unwrap();
        let june = write(
            dir.path(),
            "US/Electronics/US_Top_search_terms_Simple_Month_2025_06_30.csv",
            "meta\nSearch Term,Search Frequency Rank\nphone case,1\n",
        );
        let schema = schema();

        let first = analyze(&schema, &[&june]);
        let second = analyze(&schema, &[&june]);

        assert_eq!(first, second);
        assert!(first.is_current());
        assert_eq!(first.new_keywords_count, 0);
    }

    #[test]
    fn test_category_of() {
        assert_eq!(
            category_of(Path::new("DATA/US/Beauty/2025-July.csv")),
            Some("Beauty".to_string())
        );
        assert_eq!(category_of(Path::new("2025-July.csv")), None);
    }
}
