// ⚙️ Pipeline Configuration
// Loaded from a JSON file; every field is optional and falls back to Default.

use crate::aggregate::AggregateConfig;
use crate::flatten::MissingFieldPolicy;
use crate::records::RecordKind;
use crate::storage::WriteMode;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Object store root (one subdirectory per bucket)
    pub raw_root: PathBuf,

    /// Bucket and key prefix the API fetcher drops raw payloads into
    pub raw_bucket: String,
    pub raw_prefix: String,

    /// Dataset root for flattened and analytics tables
    pub output_root: PathBuf,

    /// SQLite catalog file
    pub catalog_path: PathBuf,

    /// Catalog database the tables are registered under
    pub database: String,

    pub details_table: String,
    pub classification_table: String,
    pub poll_table: String,
    pub analytics_table: String,
    pub analytics_classification_table: String,

    /// Write mode for the flattened datasets
    pub write_mode: WriteMode,

    /// Write mode for the analytics outputs (each run recomputes everything)
    pub aggregate_write_mode: WriteMode,

    pub missing_field_policy: MissingFieldPolicy,

    /// Sub-domain rank columns emitted in the details table
    pub subdomain_slots: usize,

    pub aggregate: AggregateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            raw_root: PathBuf::from("data/raw"),
            raw_bucket: "bgg-raw".to_string(),
            raw_prefix: "raw/".to_string(),
            output_root: PathBuf::from("data/datasets"),
            catalog_path: PathBuf::from("data/catalog.db"),
            database: "bgg-database".to_string(),
            details_table: "bgg_transformed".to_string(),
            classification_table: "bgg_transformed_classification".to_string(),
            poll_table: "bgg_transformed_poll".to_string(),
            analytics_table: "bgg_analytics".to_string(),
            analytics_classification_table: "bgg_analytics_classification".to_string(),
            write_mode: WriteMode::Append,
            aggregate_write_mode: WriteMode::Overwrite,
            missing_field_policy: MissingFieldPolicy::Abort,
            subdomain_slots: 2,
            aggregate: AggregateConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            bail!("Config: database name is empty");
        }

        let names = [
            &self.details_table,
            &self.classification_table,
            &self.poll_table,
            &self.analytics_table,
            &self.analytics_classification_table,
        ];
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() || name.contains('/') {
                bail!("Config: invalid table name '{}'", name);
            }
            if names[..i].contains(name) {
                bail!("Config: table name '{}' is used twice", name);
            }
        }

        Ok(())
    }

    /// Dataset name for a flattened record kind
    pub fn table_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Details => &self.details_table,
            RecordKind::Classification => &self.classification_table,
            RecordKind::Poll => &self.poll_table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.database, "bgg-database");
        assert_eq!(config.table_for(RecordKind::Details), "bgg_transformed");
        assert_eq!(
            config.table_for(RecordKind::Classification),
            "bgg_transformed_classification"
        );
        assert_eq!(config.subdomain_slots, 2);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.aggregate_write_mode, WriteMode::Overwrite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "output_root": "/tmp/bgg",
                "write_mode": "overwrite_partitions",
                "missing_field_policy": "skip",
                "aggregate": {{ "max_rank": 100 }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/tmp/bgg"));
        assert_eq!(config.write_mode, WriteMode::OverwritePartitions);
        assert_eq!(config.missing_field_policy, MissingFieldPolicy::Skip);
        assert_eq!(config.aggregate.max_rank, 100);
        assert_eq!(config.aggregate.cutoff_year, 2024);
        assert_eq!(config.database, "bgg-database");
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "write_mode": "sometimes" }}"#).unwrap();
        assert!(PipelineConfig::from_file(file.path()).is_err());

        let mut config = PipelineConfig::default();
        config.poll_table = config.details_table.clone();
        assert!(config.validate().is_err());

        assert!(PipelineConfig::from_file("/nonexistent/config.json").is_err());
    }
}
