// 🗄️ Partitioned Dataset Store
// Hive-style layout on the local filesystem:
//   {root}/{table}/{key1}={value1}/{key2}={value2}/part-{hash}.csv
// Partition columns live in the path only. Part files are named by a hash of
// their content, so writing the same rows twice lands on the same file.

use crate::table::{Column, Table, Value, NULL_PARTITION};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add part files next to existing ones
    #[default]
    Append,
    /// Replace the whole dataset
    Overwrite,
    /// Replace only the partitions being written
    OverwritePartitions,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
            WriteMode::OverwritePartitions => "overwrite_partitions",
        };
        f.write_str(s)
    }
}

impl FromStr for WriteMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            "overwrite_partitions" => Ok(WriteMode::OverwritePartitions),
            other => Err(anyhow!("Unknown write mode '{}'", other)),
        }
    }
}

/// One partition touched by a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPartition {
    /// (column, value) pairs in partition-key order
    pub values: Vec<(String, String)>,
    pub location: PathBuf,
    pub file: PathBuf,
    pub rows: usize,
}

pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DatasetStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_location(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    fn partition_location(&self, table: &str, values: &[(String, String)]) -> PathBuf {
        values
            .iter()
            .fold(self.table_location(table), |path, (key, value)| {
                path.join(format!("{}={}", key, urlencoding::encode(value)))
            })
    }

    /// Write a table split by `partition_keys`. Empty tables write nothing.
    pub fn write(
        &self,
        table_name: &str,
        table: &Table,
        partition_keys: &[&str],
        mode: WriteMode,
    ) -> Result<Vec<WrittenPartition>> {
        let location = self.table_location(table_name);

        if mode == WriteMode::Overwrite && location.exists() {
            fs::remove_dir_all(&location)
                .with_context(|| format!("Failed to clear dataset: {}", location.display()))?;
        }

        let mut written = Vec::new();

        for (values, part) in table.partition_by(partition_keys)? {
            let dir = self.partition_location(table_name, &values);

            if mode == WriteMode::OverwritePartitions && dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to clear partition: {}", dir.display()))?;
            }
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create partition: {}", dir.display()))?;

            let body = part.to_csv_string()?;
            let file = dir.join(format!("part-{}.csv", content_hash(&body)));
            fs::write(&file, &body)
                .with_context(|| format!("Failed to write part file: {}", file.display()))?;

            log::debug!("Wrote {} rows to {}", part.len(), file.display());

            written.push(WrittenPartition {
                values,
                location: dir,
                file,
                rows: part.len(),
            });
        }

        Ok(written)
    }

    /// Delete every partition under a leading `key=value` prefix,
    /// e.g. one `date=` subtree. Returns false if nothing was there.
    pub fn remove_partitions(&self, table_name: &str, prefix: &[(String, String)]) -> Result<bool> {
        let dir = self.partition_location(table_name, prefix);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to clear partitions: {}", dir.display()))?;
        Ok(true)
    }

    /// Read every part file of a dataset. Partition columns are restored from
    /// the directory names and typed by `columns`. A missing dataset is empty.
    pub fn read(&self, table_name: &str, columns: &[Column], partition_keys: &[&str]) -> Result<Table> {
        let mut table = Table::new(columns.to_vec());
        let location = self.table_location(table_name);

        if !location.exists() {
            return Ok(table);
        }

        let data_columns: Vec<Column> = columns
            .iter()
            .filter(|c| !partition_keys.contains(&c.name.as_str()))
            .cloned()
            .collect();

        let mut files = Vec::new();
        collect_part_files(&location, &mut files)?;
        files.sort();

        for file in files {
            let partition = parse_partition_path(&location, &file)?;
            for key in partition_keys {
                if !partition.iter().any(|(k, _)| k.as_str() == *key) {
                    bail!("{} is not under a '{}=' directory", file.display(), key);
                }
            }

            let reader = fs::File::open(&file)
                .with_context(|| format!("Failed to open part file: {}", file.display()))?;
            let part = Table::read_csv(reader, &data_columns)
                .with_context(|| format!("Failed to read part file: {}", file.display()))?;

            for row in part.rows() {
                let mut data = row.iter();
                let mut full = Vec::with_capacity(columns.len());
                for col in columns {
                    if partition_keys.contains(&col.name.as_str()) {
                        let raw = partition
                            .iter()
                            .find(|(k, _)| *k == col.name)
                            .map(|(_, v)| v.as_str())
                            .unwrap_or(NULL_PARTITION);
                        full.push(Value::parse(raw, col.kind)?);
                    } else {
                        full.push(data.next().cloned().unwrap_or(Value::Null));
                    }
                }
                table.push_row(full)?;
            }
        }

        Ok(table)
    }
}

/// First 16 hex chars of the SHA-256 of a part file body
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

fn collect_part_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_part_files(&path, files)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }

    Ok(())
}

/// `key=value` segments between the dataset root and a part file
fn parse_partition_path(location: &Path, file: &Path) -> Result<Vec<(String, String)>> {
    let relative = file
        .parent()
        .and_then(|p| p.strip_prefix(location).ok())
        .ok_or_else(|| anyhow!("{} is outside {}", file.display(), location.display()))?;

    relative
        .components()
        .map(|c| {
            let segment = c.as_os_str().to_string_lossy();
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| anyhow!("Not a partition directory: {}", segment))?;
            let value = urlencoding::decode(value)
                .with_context(|| format!("Bad partition value: {}", value))?;
            Ok((key.to_string(), value.into_owned()))
        })
        .collect()
}
