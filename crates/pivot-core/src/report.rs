//! Human-readable summaries of a table and of pending updates

use crate::analyzer::ChangeAnalysis;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Snapshot of a country's table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub country: String,
    pub table_path: PathBuf,
    pub metadata_path: PathBuf,
    /// (rows, columns) including `Search Term`; None when no table exists
    pub shape: Option<(usize, usize)>,
    /// Categories, alphabetical
    pub categories: Vec<String>,
    /// Months, chronological
    pub months: Vec<String>,
    pub keyword_count: usize,
    pub last_updated: DateTime<Utc>,
}

impl fmt::Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Country: {}", self.country)?;
        match self.shape {
            Some((rows, cols)) => {
                writeln!(f, "Table: {}", self.table_path.display())?;
                writeln!(f, "Dimensions: {} rows x {} columns", rows, cols)?;
            }
            None => writeln!(f, "Table: none ({} not found)", self.table_path.display())?,
        }
        writeln!(f, "Metadata: {}", self.metadata_path.display())?;
        writeln!(f, "Categories ({}): {}", self.categories.len(), self.categories.join(", "))?;
        writeln!(f, "Months ({}): {}", self.months.len(), month_range(&self.months))?;
        writeln!(f, "Keywords: {}", self.keyword_count)?;
        write!(
            f,
            "Last updated: {}",
            self.last_updated.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn month_range(months: &[String]) -> String {
    match (months.first(), months.last()) {
        (Some(first), Some(last)) if first != last => format!("{} to {}", first, last),
        (Some(only), _) => only.clone(),
        _ => "none".to_string(),
    }
}

/// Current state plus what an update would add
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub info: TableInfo,
    pub analysis: ChangeAnalysis,
    pub generated_at: DateTime<Utc>,
}

impl UpdateReport {
    pub fn new(info: TableInfo, analysis: ChangeAnalysis) -> Self {
        Self {
            info,
            analysis,
            generated_at: Utc::now(),
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        let a = &self.analysis;
        let mut recs = Vec::new();
        match (a.new_months.is_empty(), a.new_categories.is_empty()) {
            (false, false) => recs.push("Add both new months and new categories".to_string()),
            (false, true) => recs.push("Add new months to extend the time range".to_string()),
            (true, false) => recs.push("Add new categories to extend category coverage".to_string()),
            (true, true) => {}
        }
        if !a.pending_categories.is_empty() {
            recs.push(format!(
                "Merge again {} pending categories: {}",
                a.pending_categories.len(),
                a.pending_categories.join(", ")
            ));
        }
        if a.new_keywords_count > 0 {
            recs.push(format!(
                "Update would add about {} new keywords to the table",
                a.new_keywords_count
            ));
        }
        if recs.is_empty() {
            recs.push("No new data detected, table is current".to_string());
        }
        recs
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.analysis;
        writeln!(f, "UPDATE ANALYSIS REPORT")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Country: {}", self.info.country)?;
        writeln!(
            f,
            "Generated: {}",
            self.generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f)?;

        writeln!(f, "CURRENT STATE:")?;
        writeln!(f, "  Categories: {}", self.info.categories.join(", "))?;
        writeln!(
            f,
            "  Months: {} ({})",
            self.info.months.len(),
            month_range(&self.info.months)
        )?;
        writeln!(f, "  Keywords: {}", self.info.keyword_count)?;
        writeln!(f)?;

        writeln!(f, "NEW DATA AVAILABLE:")?;
        if a.new_months.is_empty() {
            writeln!(f, "  New months: none")?;
        } else {
            writeln!(f, "  New months ({}):", a.new_months.len())?;
            for month in &a.new_months {
                let sources: Vec<&str> = a
                    .month_sources
                    .get(month)
                    .map(|s| s.iter().map(String::as_str).collect())
                    .unwrap_or_default();
                if sources.is_empty() {
                    writeln!(f, "    - {}", month)?;
                } else {
                    writeln!(f, "    - {} [{}]", month, sources.join(", "))?;
                }
            }
        }
        if a.new_categories.is_empty() {
            writeln!(f, "  New categories: none")?;
        } else {
            writeln!(f, "  New categories ({}):", a.new_categories.len())?;
            for category in &a.new_categories {
                writeln!(f, "    - {}", category)?;
            }
        }
        if !a.pending_categories.is_empty() {
            writeln!(f, "  Pending categories ({}):", a.pending_categories.len())?;
            for category in &a.pending_categories {
                writeln!(f, "    - {}", category)?;
            }
        }
        if a.new_keywords_count > 0 {
            writeln!(f, "  New keywords (estimate): {}", a.new_keywords_count)?;
        } else {
            writeln!(f, "  New keywords: none")?;
        }
        writeln!(f)?;

        writeln!(f, "RECOMMENDATIONS:")?;
        for rec in self.recommendations() {
            writeln!(f, "  - {}", rec)?;
        }
        writeln!(f)?;

        writeln!(f, "NEXT STEPS:")?;
        if a.is_current() {
            write!(f, "  No updates needed")
        } else {
            writeln!(f, "  1. Review the analysis above")?;
            writeln!(f, "  2. Preview with `update --dry-run`")?;
            write!(f, "  3. Run `update`, or `add-months` / `add-category` for a single category")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn info() -> TableInfo {
        TableInfo {
            country: "US".to_string(),
            table_path: PathBuf::from("outputs/us_pivot_table.csv"),
            metadata_path: PathBuf::from("outputs/metadata/us_structure.json"),
            shape: Some((2, 3)),
            categories: vec!["Electronics".to_string()],
            months: vec!["2025-May".to_string(), "2025-June".to_string()],
            keyword_count: 2,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_current_table_report() {
        let report = UpdateReport::new(info(), ChangeAnalysis::default());
        assert_eq!(report.recommendations(), vec!["No new data detected, table is current"]);

        let text = report.to_string();
        assert!(text.contains("Months: 2 (2025-May to 2025-June)"));
        assert!(text.contains("No updates needed"));
    }

    #[test]
    fn test_report_lists_new_data() {
        let analysis = ChangeAnalysis {
            new_months: vec!["2025-July".to_string()],
            new_keywords_count: 14,
            month_sources: BTreeMap::from([(
                "2025-July".to_string(),
                BTreeSet::from(["Electronics".to_string()]),
            )]),
            ..Default::default()
        };
        let report = UpdateReport::new(info(), analysis);

        let recs = report.recommendations();
        assert_eq!(recs.len(), 2);
        assert!(recs[0].contains("new months"));

        let text = report.to_string();
        assert!(text.contains("- 2025-July [Electronics]"));
        assert!(text.contains("New keywords (estimate): 14"));
        assert!(text.contains("update --dry-run"));
    }

    #[test]
    fn test_report_lists_pending_categories() {
        let analysis = ChangeAnalysis {
            pending_categories: vec!["Toys".to_string()],
            ..Default::default()
        };
        let report = UpdateReport::new(info(), analysis);

        assert_eq!(
            report.recommendations(),
            vec!["Merge again 1 pending categories: Toys"]
        );
        let text = report.to_string();
        assert!(text.contains("Pending categories (1):\n    - Toys"));
        assert!(!text.contains("No updates needed"));
    }

    #[test]
    fn test_info_without_table() {
        let mut info = info();
        info.shape = None;
        info.months.clear();
        let text = info.to_string();
        assert!(text.contains("Table: none"));
        assert!(text.contains("Months (0): none"));
    }
}
