use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::table::Column;

/// Registered dataset: schema + partition keys + storage location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub database: String,
    pub name: String,
    pub location: String,
    pub columns: Vec<Column>,
    pub partition_keys: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl TableDefinition {
    pub fn partition_key_refs(&self) -> Vec<&str> {
        self.partition_keys.iter().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub values: Vec<(String, String)>,
    pub location: String,
}

/// Audit trail entry: one per dataset write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub database: String,
    pub table_name: String,
    pub rows: i64,
    pub data: serde_json::Value,
}

impl CatalogEvent {
    pub fn new(
        event_type: &str,
        database: &str,
        table_name: &str,
        rows: usize,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            database: database.to_string(),
            table_name: table_name.to_string(),
            rows: rows as i64,
            data,
        }
    }
}

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create catalog directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog: {}", path.display()))?;
        // Enable WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        setup_catalog(&conn)?;
        Ok(Catalog { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_catalog(&conn)?;
        Ok(Catalog { conn })
    }

    /// Create the table or update its schema/location in place
    pub fn upsert_table(
        &self,
        database: &str,
        name: &str,
        location: &Path,
        columns: &[Column],
        partition_keys: &[&str],
    ) -> Result<()> {
        let columns_json = serde_json::to_string(columns)?;
        let keys_json = serde_json::to_string(partition_keys)?;

        self.conn.execute(
            "INSERT INTO catalog_tables (database_name, name, location, columns, partition_keys, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(database_name, name) DO UPDATE SET
                location = excluded.location,
                columns = excluded.columns,
                partition_keys = excluded.partition_keys,
                updated_at = excluded.updated_at",
            params![
                database,
                name,
                location.to_string_lossy().to_string(),
                columns_json,
                keys_json,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn get_table(&self, database: &str, name: &str) -> Result<Option<TableDefinition>> {
        let row = self
            .conn
            .query_row(
                "SELECT database_name, name, location, columns, partition_keys, updated_at
                 FROM catalog_tables
                 WHERE database_name = ?1 AND name = ?2",
                params![database, name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(table_from_row).transpose()
    }

    pub fn list_tables(&self, database: &str) -> Result<Vec<TableDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT database_name, name, location, columns, partition_keys, updated_at
             FROM catalog_tables
             WHERE database_name = ?1
             ORDER BY name",
        )?;

        let rows = stmt
            .query_map(params![database], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(table_from_row).collect()
    }

    /// Register a partition; returns false if it was already known
    pub fn add_partition(
        &self,
        database: &str,
        table_name: &str,
        values: &[(String, String)],
        location: &Path,
    ) -> Result<bool> {
        let values_json = serde_json::to_string(values)?;

        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO catalog_partitions (database_name, table_name, partition_values, location)
             VALUES (?1, ?2, ?3, ?4)",
            params![database, table_name, values_json, location.to_string_lossy().to_string()],
        )?;

        Ok(changed > 0)
    }

    pub fn list_partitions(&self, database: &str, table_name: &str) -> Result<Vec<PartitionEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_values, location
             FROM catalog_partitions
             WHERE database_name = ?1 AND table_name = ?2
             ORDER BY partition_values",
        )?;

        let rows = stmt
            .query_map(params![database, table_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(values_json, location)| {
                let values = serde_json::from_str(&values_json)
                    .context("Corrupt partition values in catalog")?;
                Ok(PartitionEntry { values, location })
            })
            .collect()
    }

    /// Forget every partition of a table (dataset overwritten)
    pub fn clear_partitions(&self, database: &str, table_name: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM catalog_partitions WHERE database_name = ?1 AND table_name = ?2",
            params![database, table_name],
        )?;
        Ok(removed)
    }

    /// Forget the partitions whose values start with `prefix`
    pub fn remove_partitions_under(
        &self,
        database: &str,
        table_name: &str,
        prefix: &[(String, String)],
    ) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list_partitions(database, table_name)? {
            if !entry.values.starts_with(prefix) {
                continue;
            }
            let values_json = serde_json::to_string(&entry.values)?;
            removed += self.conn.execute(
                "DELETE FROM catalog_partitions
                 WHERE database_name = ?1 AND table_name = ?2 AND partition_values = ?3",
                params![database, table_name, values_json],
            )?;
        }
        Ok(removed)
    }

    pub fn record_event(&self, event: &CatalogEvent) -> Result<()> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn.execute(
            "INSERT INTO catalog_events (
                event_id, timestamp, event_type, database_name, table_name, row_count, data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.database,
                event.table_name,
                event.rows,
                data_json,
            ],
        )?;

        Ok(())
    }

    pub fn events_for_table(&self, database: &str, table_name: &str) -> Result<Vec<CatalogEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, database_name, table_name, row_count, data
             FROM catalog_events
             WHERE database_name = ?1 AND table_name = ?2
             ORDER BY id",
        )?;

        let events = stmt
            .query_map(params![database, table_name], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(6)?;

                Ok(CatalogEvent {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    database: row.get(3)?,
                    table_name: row.get(4)?,
                    rows: row.get(5)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

fn table_from_row(
    (database, name, location, columns, keys, updated_at): (String, String, String, String, String, String),
) -> Result<TableDefinition> {
    Ok(TableDefinition {
        database,
        name,
        location,
        columns: serde_json::from_str(&columns).context("Corrupt column list in catalog")?,
        partition_keys: serde_json::from_str(&keys).context("Corrupt partition keys in catalog")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .context("Corrupt timestamp in catalog")?
            .with_timezone(&Utc),
    })
}

pub fn setup_catalog(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // Table registry
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_tables (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            database_name TEXT NOT NULL,
            name TEXT NOT NULL,
            location TEXT NOT NULL,
            columns TEXT NOT NULL,
            partition_keys TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(database_name, name)
        )",
        [],
    )?;

    // ==========================================================================
    // Partitions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_partitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            database_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            partition_values TEXT NOT NULL,
            location TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(database_name, table_name, partition_values)
        )",
        [],
    )?;

    // ==========================================================================
    // Events (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            database_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_table ON catalog_events(database_name, table_name)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("bgg_id", ColumnType::String),
            Column::new("bgg_rank", ColumnType::Int),
            Column::new("date", ColumnType::String),
            Column::new("type", ColumnType::String),
        ]
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let catalog = Catalog::open_in_memory().unwrap();

        catalog
            .upsert_table("bgg-database", "bgg_transformed", Path::new("/data/a"), &columns(), &["date", "type"])
            .unwrap();
        let first = catalog.get_table("bgg-database", "bgg_transformed").unwrap().unwrap();
        assert_eq!(first.columns, columns());
        assert_eq!(first.partition_key_refs(), vec!["date", "type"]);

        let mut wider = columns();
        wider.push(Column::new("average", ColumnType::Double));
        catalog
            .upsert_table("bgg-database", "bgg_transformed", Path::new("/data/b"), &wider, &["date", "type"])
            .unwrap();

        let tables = catalog.list_tables("bgg-database").unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].location, "/data/b");
        assert_eq!(tables[0].columns.len(), 5);
    }

    #[test]
    fn test_unknown_table_is_none() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(catalog.get_table("bgg-database", "nope").unwrap().is_none());
    }

    #[test]
    fn test_partitions_are_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        let values = vec![
            ("date".to_string(), "2024-01-25".to_string()),
            ("type".to_string(), "details".to_string()),
        ];

        let location = Path::new("/data/t/date=2024-01-25/type=details");
        assert!(catalog.add_partition("db", "t", &values, location).unwrap());
        assert!(!catalog.add_partition("db", "t", &values, location).unwrap());

        let partitions = catalog.list_partitions("db", "t").unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].values, values);

        assert_eq!(catalog.clear_partitions("db", "t").unwrap(), 1);
        assert!(catalog.list_partitions("db", "t").unwrap().is_empty());
    }

    #[test]
    fn test_remove_partitions_under_prefix() {
        let catalog = Catalog::open_in_memory().unwrap();
        let part = |date: &str, kind: &str| {
            vec![
                ("date".to_string(), date.to_string()),
                ("type".to_string(), "classification".to_string()),
                ("classification".to_string(), kind.to_string()),
            ]
        };
        let location = Path::new("/data/t");
        for values in [
            part("2024-01-25", "boardgamemechanic"),
            part("2024-01-25", "boardgamecategory"),
            part("2024-01-26", "boardgamemechanic"),
        ] {
            catalog.add_partition("db", "t", &values, location).unwrap();
        }

        let day1 = vec![("date".to_string(), "2024-01-25".to_string())];
        assert_eq!(catalog.remove_partitions_under("db", "t", &day1).unwrap(), 2);

        let left = catalog.list_partitions("db", "t").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].values, part("2024-01-26", "boardgamemechanic"));
    }

    #[test]
    fn test_event_log() {
        let catalog = Catalog::open_in_memory().unwrap();
        let event = CatalogEvent::new(
            "dataset_written",
            "db",
            "t",
            42,
            serde_json::json!({"mode": "append"}),
        );

        catalog.record_event(&event).unwrap();
        let events = catalog.events_for_table("db", "t").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rows, 42);
        assert_eq!(events[0].event_type, "dataset_written");
        assert_eq!(events[0].data["mode"], "append");
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog").join("catalog.db");

        {
            let catalog = Catalog::open(&path).unwrap();
            catalog
                .upsert_table("db", "t", Path::new("/x"), &columns(), &["date"])
                .unwrap();
        }

        let reopened = Catalog::open(&path).unwrap();
        assert!(reopened.get_table("db", "t").unwrap().is_some());
    }
}
