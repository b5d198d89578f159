// 🏷️ Classification Flattener
// One row per <link>: mechanics, categories, designers, publishers, families...
// No dedup here; the aggregator absorbs replays.

use crate::document::XmlNode;
use crate::error::FlattenError;
use crate::flatten::{item_id, ItemFlattener};
use crate::records::{ClassificationRecord, IngestionStamp, RecordKind};
use crate::table::{Column, Value};

pub struct ClassificationFlattener;

impl ClassificationFlattener {
    pub fn new() -> Self {
        ClassificationFlattener
    }
}

impl Default for ClassificationFlattener {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemFlattener for ClassificationFlattener {
    fn kind(&self) -> RecordKind {
        RecordKind::Classification
    }

    fn schema(&self) -> Vec<Column> {
        ClassificationRecord::schema()
    }

    fn flatten_item(
        &self,
        item: &XmlNode,
        stamp: &IngestionStamp,
    ) -> Result<Vec<Vec<Value>>, FlattenError> {
        Ok(parse_links(item)?
            .iter()
            .map(|link| link.to_row(stamp))
            .collect())
    }
}

/// Every <link> child of an item, in document order
pub fn parse_links(item: &XmlNode) -> Result<Vec<ClassificationRecord>, FlattenError> {
    let id = item_id(item)?;

    Ok(item
        .find_all("link")
        .map(|link| ClassificationRecord {
            bgg_id: id.to_string(),
            classification: link.attr("type").map(str::to_string),
            value: link.attr("value").map(str::to_string),
        })
        .collect())
}
