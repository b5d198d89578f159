// 🏗️ Flattener Framework
// One trait per record shape; the driver walks every <item> and applies a
// single missing-field policy to all of them.

use crate::classification::ClassificationFlattener;
use crate::details::DetailsFlattener;
use crate::document::XmlNode;
use crate::error::FlattenError;
use crate::polls::PollFlattener;
use crate::records::{IngestionStamp, RecordKind};
use crate::table::{Column, Table, Value};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with an item whose required field is missing or malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFieldPolicy {
    /// Fail the whole payload; nothing is written
    #[default]
    Abort,
    /// Drop the item, log a warning, keep going
    Skip,
}

impl fmt::Display for MissingFieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingFieldPolicy::Abort => f.write_str("abort"),
            MissingFieldPolicy::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for MissingFieldPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(MissingFieldPolicy::Abort),
            "skip" => Ok(MissingFieldPolicy::Skip),
            other => Err(anyhow::anyhow!("Unknown missing-field policy '{}'", other)),
        }
    }
}

// ============================================================================
// FLATTENER TRAIT
// ============================================================================

/// ItemFlattener - turns one <item> subtree into zero or more table rows
pub trait ItemFlattener: Send + Sync {
    /// Discriminator written to the `type` column
    fn kind(&self) -> RecordKind;

    /// Output table schema
    fn schema(&self) -> Vec<Column>;

    /// Rows for a single item. Soft lookups yield nulls/defaults; required
    /// conversions fail with a FlattenError.
    fn flatten_item(
        &self,
        item: &XmlNode,
        stamp: &IngestionStamp,
    ) -> Result<Vec<Vec<Value>>, FlattenError>;

    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Factory: flattener for a record kind
pub fn get_flattener(kind: RecordKind, subdomain_slots: usize) -> Box<dyn ItemFlattener> {
    match kind {
        RecordKind::Details => Box::new(DetailsFlattener::new(subdomain_slots)),
        RecordKind::Classification => Box::new(ClassificationFlattener::new()),
        RecordKind::Poll => Box::new(PollFlattener::new()),
    }
}

/// Required item id (every record carries it)
pub fn item_id(item: &XmlNode) -> Result<&str, FlattenError> {
    item.attr("id").ok_or_else(|| FlattenError::MissingField {
        item_id: "<unknown>".to_string(),
        field: "id".to_string(),
    })
}

// ============================================================================
// DOCUMENT DRIVER
// ============================================================================

/// Flatten every <item> under the document root into one table
pub fn flatten_document(
    flattener: &dyn ItemFlattener,
    root: &XmlNode,
    stamp: &IngestionStamp,
    policy: MissingFieldPolicy,
) -> Result<Table> {
    let mut table = Table::new(flattener.schema());
    let mut skipped = 0;

    for item in root.find_all("item") {
        let rows = match flattener.flatten_item(item, stamp) {
            Ok(rows) => rows,
            Err(err) => match policy {
                MissingFieldPolicy::Abort => {
                    return Err(err).with_context(|| {
                        format!("Failed to flatten {} records", flattener.kind())
                    });
                }
                MissingFieldPolicy::Skip => {
                    log::warn!("Skipping {} item: {}", flattener.kind(), err);
                    skipped += 1;
                    continue;
                }
            },
        };

        for row in rows {
            table.push_row(row)?;
        }
    }

    log::debug!(
        "Flattened {} {} rows ({} items skipped, flattener v{})",
        table.len(),
        flattener.kind(),
        skipped,
        flattener.version()
    );

    Ok(table)
}

/// Parse a payload and flatten it as one record kind
pub fn flatten_xml(
    xml_data: &str,
    kind: RecordKind,
    stamp: &IngestionStamp,
    policy: MissingFieldPolicy,
    subdomain_slots: usize,
) -> Result<Table> {
    let root = XmlNode::parse(xml_data).context("Failed to parse XML payload")?;
    let flattener = get_flattener(kind, subdomain_slots);
    flatten_document(flattener.as_ref(), &root, stamp, policy)
}
