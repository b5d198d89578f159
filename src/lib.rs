// BGG Analytics - Library
// Flattens BoardGameGeek XML API payloads into partitioned tables and
// aggregates them into analytics datasets.

pub mod error;
pub mod document;
pub mod table;
pub mod records;
pub mod flatten;        // Flattener trait + document driver
pub mod details;
pub mod classification;
pub mod polls;          // Poll winner resolver
pub mod aggregate;      // Batch aggregator
pub mod storage;        // Partitioned dataset store
pub mod catalog;        // Table/partition catalog (SQLite)
pub mod object_store;
pub mod notification;
pub mod config;
pub mod pipeline;

// Re-export commonly used items
pub use error::FlattenError;

pub use document::XmlNode;

pub use table::{Column, ColumnType, RowRef, Table, Value, NULL_PARTITION};

pub use records::{
    ClassificationRecord, DetailsRecord, IngestionStamp, PollRecord, RankEntry, RecordKind,
    NOT_AVAILABLE,
};

pub use flatten::{
    flatten_document, flatten_xml, get_flattener, ItemFlattener, MissingFieldPolicy,
};

pub use details::{parse_details, DetailsFlattener};
pub use classification::{parse_links, ClassificationFlattener};
pub use polls::{poll_winner, parse_polls, PollFlattener, PollResult};

pub use aggregate::{AggregateConfig, AnalyticsOutput, BatchAggregator};

pub use storage::{DatasetStore, WriteMode, WrittenPartition};

pub use catalog::{Catalog, CatalogEvent, PartitionEntry, TableDefinition};

pub use object_store::{raw_object_key, LocalObjectStore, ObjectRef, ObjectStore};
pub use notification::decode_notification;

pub use config::PipelineConfig;

pub use pipeline::{
    flatten_all, flatten_payload, ingest_notification, ingest_object, ingest_payload,
    pending_objects, run_aggregation, AggregationReport, IngestReport, TableWriteReport,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
