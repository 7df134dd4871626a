//! Directory scanner for `root/<country>/<category>/<file>.csv` data trees

use crate::error::{Error, Result};
use crate::month::{is_monthly_filename, parse_filename};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Files found for one country, grouped by category directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryScan {
    /// Category name -> CSV files, ordered by month then name
    pub categories: BTreeMap<String, Vec<PathBuf>>,
}

impl CountryScan {
    /// Files of one category
    pub fn category_files(&self, category: &str) -> &[PathBuf] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Single-month export files of one category, in month order
    pub fn monthly_files(&self, category: &str) -> Vec<PathBuf> {
        self.category_files(category)
            .iter()
            .filter(|p| is_monthly(p))
            .cloned()
            .collect()
    }

    /// Every file of every category
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.categories.values().flatten().cloned().collect()
    }

    /// Get all category names
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }
}

/// Result of scanning a data root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Root directory that was scanned
    pub root: PathBuf,
    /// Country name -> files
    pub countries: BTreeMap<String, CountryScan>,
    /// Total number of files found
    pub total_files: usize,
}

impl ScanResult {
    /// Find a country by name
    pub fn find_country(&self, country: &str) -> Option<&CountryScan> {
        self.countries.get(country)
    }

    /// Get all country names
    pub fn country_names(&self) -> Vec<&str> {
        self.countries.keys().map(String::as_str).collect()
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_monthly(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_monthly_filename)
}

/// Scan a data root for CSV files
///
/// Only files exactly three levels deep are considered; hidden directories
/// and non-CSV files are ignored. Country and category directories without
/// CSV files are still listed.
pub fn scan_data_root<P: AsRef<Path>>(root: P) -> Result<ScanResult> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(Error::FileRead {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "data root is not a directory"),
        });
    }
    let mut countries: BTreeMap<String, CountryScan> = BTreeMap::new();
    let mut total_files = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(3)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(is_hidden));

    for entry in walker {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        match (parts.as_slice(), entry.file_type().is_dir()) {
            ([country], true) => {
                countries.entry(country.clone()).or_default();
            }
            ([country, category], true) => {
                countries
                    .entry(country.clone())
                    .or_default()
                    .categories
                    .entry(category.clone())
                    .or_default();
            }
            ([country, category, _], false)
                if entry.path().extension().is_some_and(|ext| ext == "csv") =>
            {
                countries
                    .entry(country.clone())
                    .or_default()
                    .categories
                    .entry(category.clone())
                    .or_default()
                    .push(entry.path().to_path_buf());
                total_files += 1;
            }
            _ => {}
        }
    }

    for country in countries.values_mut() {
        for files in country.categories.values_mut() {
            sort_files(files);
        }
    }

    debug!(root = %root.display(), countries = countries.len(), files = total_files, "scan complete");

    Ok(ScanResult {
        root: root.to_path_buf(),
        countries,
        total_files,
    })
}

/// Sort files by the month in their name, then by name; files without a
/// month come last
fn sort_files(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let key = |p: &PathBuf| {
            let month = p
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_filename);
            (month.is_none(), month)
        };
        key(a).cmp(&key(b)).then_with(|| a.cmp(b))
    });
}
