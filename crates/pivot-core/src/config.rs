//! Project configuration: where source data lives and where outputs go

use crate::combine::DEFAULT_MAX_RANK;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_data_root() -> PathBuf {
    PathBuf::from("DATA")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_rank() -> i64 {
    DEFAULT_MAX_RANK
}

/// Paths and limits shared by every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the `<country>/<category>/<file>.csv` tree
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Directory for pivot tables
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory for schema files; `<output_dir>/metadata` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_dir: Option<PathBuf>,
    /// Rank cutoff used when combining monthly exports
    #[serde(default = "default_max_rank")]
    pub max_rank: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            output_dir: default_output_dir(),
            metadata_dir: None,
            max_rank: DEFAULT_MAX_RANK,
        }
    }
}

impl Config {
    /// Load a config file from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the config file to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content).map_err(|e| Error::FileWrite {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Directory holding schema files
    pub fn metadata_dir(&self) -> PathBuf {
        self.metadata_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("metadata"))
    }

    /// Pivot table file of a country
    pub fn table_path(&self, country: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_pivot_table.csv", country.to_lowercase()))
    }

    /// Schema file of a country
    pub fn metadata_path(&self, country: &str) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}_structure.json", country.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let config = Config::default();
        assert_eq!(config.table_path("US"), PathBuf::from("outputs/us_pivot_table.csv"));
        assert_eq!(
            config.metadata_path("US"),
            PathBuf::from("outputs/metadata/us_structure.json")
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"output_dir": "out"}"#).unwrap();
        assert_eq!(config.data_root, PathBuf::from("DATA"));
        assert_eq!(config.max_rank, 500_000);
        assert_eq!(config.metadata_dir(), PathBuf::from("out/metadata"));
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pivot.json");
        let config = Config {
            metadata_dir: Some(dir.path().join("meta")),
            max_rank: 1000,
            ..Config::default()
        };

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
