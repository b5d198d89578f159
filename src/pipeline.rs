// 🚚 Ingestion Pipeline
// raw XML payload → three flattened datasets (details, classification, poll)
// accumulated datasets → two analytics datasets
// Every dataset write is registered in the catalog and audited.

use crate::aggregate::BatchAggregator;
use crate::catalog::{Catalog, CatalogEvent};
use crate::config::PipelineConfig;
use crate::document::XmlNode;
use crate::flatten::{flatten_document, get_flattener};
use crate::notification::decode_notification;
use crate::object_store::{ObjectRef, ObjectStore};
use crate::records::{ClassificationRecord, DetailsRecord, IngestionStamp, PollRecord, RecordKind};
use crate::storage::{DatasetStore, WriteMode};
use crate::table::{Column, Table};
use anyhow::{Context, Result};
use serde::Serialize;

/// Flattened datasets are partitioned by ingestion date and record type
pub const FLATTENED_PARTITION_KEYS: [&str; 2] = ["date", "type"];
pub const ANALYTICS_PARTITION_KEYS: [&str; 2] = ["date", "type"];
pub const ANALYTICS_CLASSIFICATION_PARTITION_KEYS: [&str; 3] = ["date", "type", "classification"];

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableWriteReport {
    pub table: String,
    pub rows: usize,
    pub partitions: usize,
    pub new_partitions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub date: String,
    pub tables: Vec<TableWriteReport>,
}

impl IngestReport {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub details_read: usize,
    pub classification_read: usize,
    pub analytics: TableWriteReport,
    pub analytics_by_classification: TableWriteReport,
}

// ============================================================================
// FLATTENING
// ============================================================================

/// Flatten one payload as a single record kind
pub fn flatten_payload(
    config: &PipelineConfig,
    xml_data: &str,
    kind: RecordKind,
    stamp: &IngestionStamp,
) -> Result<Table> {
    let root = XmlNode::parse(xml_data).context("Failed to parse XML payload")?;
    flatten_root(config, &root, kind, stamp)
}

fn flatten_root(
    config: &PipelineConfig,
    root: &XmlNode,
    kind: RecordKind,
    stamp: &IngestionStamp,
) -> Result<Table> {
    let flattener = get_flattener(kind, config.subdomain_slots);
    flatten_document(flattener.as_ref(), root, stamp, config.missing_field_policy)
}

/// Flatten one payload as every record kind. The payload is parsed once and
/// nothing is returned unless all three kinds succeed.
pub fn flatten_all(
    config: &PipelineConfig,
    xml_data: &str,
    stamp: &IngestionStamp,
) -> Result<Vec<(RecordKind, Table)>> {
    let root = XmlNode::parse(xml_data).context("Failed to parse XML payload")?;

    RecordKind::ALL
        .iter()
        .map(|&kind| Ok((kind, flatten_root(config, &root, kind, stamp)?)))
        .collect()
}

/// Built-in schema of a flattened dataset
pub fn flattened_schema(config: &PipelineConfig, kind: RecordKind) -> Vec<Column> {
    match kind {
        RecordKind::Details => DetailsRecord::schema(config.subdomain_slots),
        RecordKind::Classification => ClassificationRecord::schema(),
        RecordKind::Poll => PollRecord::schema(),
    }
}

// ============================================================================
// PUBLISHING
// ============================================================================

/// Write a table to its dataset, then register schema + partitions and
/// append an audit event.
#[allow(clippy::too_many_arguments)]
fn publish(
    config: &PipelineConfig,
    datasets: &DatasetStore,
    catalog: &Catalog,
    table_name: &str,
    table: &Table,
    partition_keys: &[&str],
    mode: WriteMode,
    event_type: &str,
    source: &str,
) -> Result<TableWriteReport> {
    let written = datasets
        .write(table_name, table, partition_keys, mode)
        .with_context(|| format!("Failed to write dataset {}", table_name))?;

    catalog.upsert_table(
        &config.database,
        table_name,
        &datasets.table_location(table_name),
        table.columns(),
        partition_keys,
    )?;

    if mode == WriteMode::Overwrite {
        catalog.clear_partitions(&config.database, table_name)?;
    }

    let mut new_partitions = 0;
    for partition in &written {
        if catalog.add_partition(
            &config.database,
            table_name,
            &partition.values,
            &partition.location,
        )? {
            new_partitions += 1;
        }
    }

    let files: Vec<String> = written
        .iter()
        .map(|p| p.file.to_string_lossy().to_string())
        .collect();

    catalog.record_event(&CatalogEvent::new(
        event_type,
        &config.database,
        table_name,
        table.len(),
        serde_json::json!({
            "source": source,
            "write_mode": mode.to_string(),
            "files": files,
        }),
    ))?;

    log::info!(
        "{}: {} rows in {} partitions ({} new)",
        table_name,
        table.len(),
        written.len(),
        new_partitions
    );

    Ok(TableWriteReport {
        table: table_name.to_string(),
        rows: table.len(),
        partitions: written.len(),
        new_partitions,
    })
}

// ============================================================================
// INGESTION
// ============================================================================

/// Flatten a payload into all three datasets
pub fn ingest_payload(
    config: &PipelineConfig,
    datasets: &DatasetStore,
    catalog: &Catalog,
    xml_data: &str,
    source: &str,
    stamp: &IngestionStamp,
) -> Result<IngestReport> {
    // Flatten everything before touching storage
    let tables = flatten_all(config, xml_data, stamp)
        .with_context(|| format!("Failed to flatten {}", source))?;

    let mut reports = Vec::with_capacity(tables.len());
    for (kind, table) in &tables {
        reports.push(publish(
            config,
            datasets,
            catalog,
            config.table_for(*kind),
            table,
            &FLATTENED_PARTITION_KEYS,
            config.write_mode,
            "ingest",
            source,
        )?);
    }

    Ok(IngestReport {
        source: source.to_string(),
        date: stamp.date_string(),
        tables: reports,
    })
}

/// Fetch a raw payload from the object store and ingest it
pub fn ingest_object(
    config: &PipelineConfig,
    objects: &dyn ObjectStore,
    datasets: &DatasetStore,
    catalog: &Catalog,
    object: &ObjectRef,
    stamp: &IngestionStamp,
) -> Result<IngestReport> {
    let body = objects.get(object)?;
    let xml_data = String::from_utf8(body)
        .with_context(|| format!("Payload is not UTF-8: {}/{}", object.bucket, object.key))?;

    log::info!("Ingesting {}/{}", object.bucket, object.key);
    let source = format!("{}/{}", object.bucket, object.key);
    ingest_payload(config, datasets, catalog, &xml_data, &source, stamp)
}

/// Decode an object-created notification and ingest the object it names
pub fn ingest_notification(
    config: &PipelineConfig,
    objects: &dyn ObjectStore,
    datasets: &DatasetStore,
    catalog: &Catalog,
    notification_json: &str,
    stamp: &IngestionStamp,
) -> Result<IngestReport> {
    let object = decode_notification(notification_json)?;
    ingest_object(config, objects, datasets, catalog, &object, stamp)
}

/// Raw payload keys dropped for `stamp`'s date
pub fn pending_objects(
    config: &PipelineConfig,
    objects: &dyn ObjectStore,
    stamp: &IngestionStamp,
) -> Result<Vec<ObjectRef>> {
    let prefix = format!("{}date={}/", config.raw_prefix, stamp.date_string());
    let keys = objects.list(&config.raw_bucket, &prefix)?;
    Ok(keys
        .iter()
        .map(|key| ObjectRef::new(&config.raw_bucket, key))
        .collect())
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Read a flattened dataset, typed by its catalog schema when registered
pub fn read_flattened(
    config: &PipelineConfig,
    datasets: &DatasetStore,
    catalog: &Catalog,
    kind: RecordKind,
) -> Result<Table> {
    let table_name = config.table_for(kind);

    match catalog.get_table(&config.database, table_name)? {
        Some(definition) => datasets.read(
            table_name,
            &definition.columns,
            &definition.partition_key_refs(),
        ),
        None => datasets.read(
            table_name,
            &flattened_schema(config, kind),
            &FLATTENED_PARTITION_KEYS,
        ),
    }
}

fn only_date(table: Table, date: Option<&IngestionStamp>) -> Table {
    match date {
        Some(stamp) => {
            let wanted = stamp.date_string();
            table.filter(|row| row.get("date").and_then(|v| v.as_str()) == Some(wanted.as_str()))
        }
        None => table,
    }
}

/// Aggregate the accumulated details + classification datasets (optionally
/// a single ingestion date) into both analytics datasets.
pub fn run_aggregation(
    config: &PipelineConfig,
    datasets: &DatasetStore,
    catalog: &Catalog,
    date: Option<&IngestionStamp>,
) -> Result<AggregationReport> {
    let details = only_date(
        read_flattened(config, datasets, catalog, RecordKind::Details)?,
        date,
    );
    let classification = only_date(
        read_flattened(config, datasets, catalog, RecordKind::Classification)?,
        date,
    );

    log::info!(
        "Aggregating {} details rows and {} classification rows",
        details.len(),
        classification.len()
    );

    let aggregator = BatchAggregator::new(config.aggregate.clone())?;
    let output = aggregator.run(&details, &classification)?;

    // A single-date run only replaces that date's analytics partitions
    let mode = match date {
        Some(stamp) if config.aggregate_write_mode == WriteMode::Overwrite => {
            let prefix = vec![("date".to_string(), stamp.date_string())];
            for table_name in [&config.analytics_table, &config.analytics_classification_table] {
                datasets.remove_partitions(table_name, &prefix)?;
                catalog.remove_partitions_under(&config.database, table_name, &prefix)?;
            }
            WriteMode::Append
        }
        _ => config.aggregate_write_mode,
    };

    let analytics = publish(
        config,
        datasets,
        catalog,
        &config.analytics_table,
        &output.analytics,
        &ANALYTICS_PARTITION_KEYS,
        mode,
        "aggregate",
        &config.details_table,
    )?;

    let analytics_by_classification = publish(
        config,
        datasets,
        catalog,
        &config.analytics_classification_table,
        &output.analytics_by_classification,
        &ANALYTICS_CLASSIFICATION_PARTITION_KEYS,
        mode,
        "aggregate",
        &config.classification_table,
    )?;

    Ok(AggregationReport {
        details_read: details.len(),
        classification_read: classification.len(),
        analytics,
        analytics_by_classification,
    })
}
