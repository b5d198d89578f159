// 🧾 Flat Records - typed rows emitted by the flatteners
// Each record projects onto a fixed table schema stamped with the ingestion date.

use crate::table::{Column, ColumnType, Value};
use anyhow::{anyhow, Result};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Null-name sentinel for absent sub-domain slots and unresolved polls
pub const NOT_AVAILABLE: &str = "N/A";

// ============================================================================
// RECORD KIND (discriminator column "type")
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Details,
    Classification,
    Poll,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Details,
        RecordKind::Classification,
        RecordKind::Poll,
    ];

    /// Value written to the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Details => "details",
            RecordKind::Classification => "classification",
            RecordKind::Poll => "poll",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "details" => Ok(RecordKind::Details),
            "classification" => Ok(RecordKind::Classification),
            "poll" | "polls" => Ok(RecordKind::Poll),
            other => Err(anyhow!(
                "Unknown record kind '{}' (expected details, classification or poll)",
                other
            )),
        }
    }
}

// ============================================================================
// INGESTION STAMP
// ============================================================================

/// The date a payload was processed; doubles as the `date` partition key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStamp {
    pub date: NaiveDate,
}

impl IngestionStamp {
    pub fn new(date: NaiveDate) -> Self {
        IngestionStamp { date }
    }

    pub fn today() -> Self {
        IngestionStamp {
            date: Local::now().date_naive(),
        }
    }

    /// Parse `YYYY-MM-DD`
    pub fn parse(s: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| anyhow!("Invalid ingestion date '{}': {}", s, e))?;
        Ok(IngestionStamp { date })
    }

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn year(&self) -> i64 {
        self.date.year() as i64
    }

    pub fn month(&self) -> i64 {
        self.date.month() as i64
    }

    pub fn day(&self) -> i64 {
        self.date.day() as i64
    }
}

// ============================================================================
// DETAILS
// ============================================================================

/// One entry of an item's rank list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub friendly_name: String,
    /// Positive rank, or 0 for "Not Ranked"
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsRecord {
    pub bgg_id: String,
    pub bgg_type: Option<String>,
    pub name: Option<String>,
    pub img_src: String,
    pub description: Option<String>,
    pub year_published: i64,
    pub min_players: i64,
    pub max_players: i64,
    pub playing_time: i64,
    pub min_playtime: i64,
    pub max_playtime: i64,
    pub min_age: i64,
    pub users_rated: i64,
    pub average: f64,
    pub bayes_average: f64,
    pub num_weights: i64,
    pub average_weight: f64,
    pub bgg_rank: u32,
    pub num_owners: i64,
    /// Sub-domain ranks in document order (everything after the overall rank)
    pub subdomains: Vec<RankEntry>,
}

impl DetailsRecord {
    /// Table schema with `slots` sub-domain column pairs
    pub fn schema(slots: usize) -> Vec<Column> {
        let mut columns = vec![
            Column::new("bgg_id", ColumnType::String),
            Column::new("bgg_type", ColumnType::String),
            Column::new("name", ColumnType::String),
            Column::new("img_src", ColumnType::String),
            Column::new("description", ColumnType::String),
            Column::new("year_published", ColumnType::Int),
            Column::new("min_players", ColumnType::Int),
            Column::new("max_players", ColumnType::Int),
            Column::new("playing_time", ColumnType::Int),
            Column::new("min_playtime", ColumnType::Int),
            Column::new("max_playtime", ColumnType::Int),
            Column::new("min_age", ColumnType::Int),
            Column::new("users_rated", ColumnType::Int),
            Column::new("average", ColumnType::Double),
            Column::new("bayes_average", ColumnType::Double),
            Column::new("num_weights", ColumnType::Int),
            Column::new("average_weight", ColumnType::Double),
            Column::new("bgg_rank", ColumnType::Int),
            Column::new("num_owners", ColumnType::Int),
        ];

        for slot in 1..=slots {
            columns.push(Column::new(&format!("subdomain_{}", slot), ColumnType::String));
            columns.push(Column::new(&format!("subdomain_{}_rank", slot), ColumnType::Int));
        }

        columns.extend(stamp_columns(true));
        columns
    }

    /// Sub-domain in 1-based `slot`, or the ("N/A", 0) default
    pub fn subdomain(&self, slot: usize) -> (&str, u32) {
        slot.checked_sub(1)
            .and_then(|i| self.subdomains.get(i))
            .map(|rank| (rank.friendly_name.as_str(), rank.value))
            .unwrap_or((NOT_AVAILABLE, 0))
    }

    pub fn to_row(&self, stamp: &IngestionStamp, slots: usize) -> Vec<Value> {
        let mut row = vec![
            Value::str(&self.bgg_id),
            Value::opt_str(self.bgg_type.as_deref()),
            Value::opt_str(self.name.as_deref()),
            Value::str(&self.img_src),
            Value::opt_str(self.description.as_deref()),
            Value::Int(self.year_published),
            Value::Int(self.min_players),
            Value::Int(self.max_players),
            Value::Int(self.playing_time),
            Value::Int(self.min_playtime),
            Value::Int(self.max_playtime),
            Value::Int(self.min_age),
            Value::Int(self.users_rated),
            Value::Float(self.average),
            Value::Float(self.bayes_average),
            Value::Int(self.num_weights),
            Value::Float(self.average_weight),
            Value::Int(self.bgg_rank as i64),
            Value::Int(self.num_owners),
        ];

        for slot in 1..=slots {
            let (name, rank) = self.subdomain(slot);
            row.push(Value::str(name));
            row.push(Value::Int(rank as i64));
        }

        row.extend(stamp_values(stamp, RecordKind::Details, true));
        row
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub bgg_id: String,
    /// `link@type`, e.g. boardgamemechanic
    pub classification: Option<String>,
    pub value: Option<String>,
}

impl ClassificationRecord {
    pub fn schema() -> Vec<Column> {
        let mut columns = vec![
            Column::new("bgg_id", ColumnType::String),
            Column::new("classification", ColumnType::String),
            Column::new("value", ColumnType::String),
        ];
        columns.extend(stamp_columns(false));
        columns
    }

    pub fn to_row(&self, stamp: &IngestionStamp) -> Vec<Value> {
        let mut row = vec![
            Value::str(&self.bgg_id),
            Value::opt_str(self.classification.as_deref()),
            Value::opt_str(self.value.as_deref()),
        ];
        row.extend(stamp_values(stamp, RecordKind::Classification, false));
        row
    }
}

// ============================================================================
// POLL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    pub bgg_id: String,
    pub poll_title: String,
    pub poll_answer: String,
}

impl PollRecord {
    pub fn schema() -> Vec<Column> {
        let mut columns = vec![
            Column::new("bgg_id", ColumnType::String),
            Column::new("poll_title", ColumnType::String),
            Column::new("poll_answer", ColumnType::String),
        ];
        columns.extend(stamp_columns(false));
        columns
    }

    pub fn to_row(&self, stamp: &IngestionStamp) -> Vec<Value> {
        let mut row = vec![
            Value::str(&self.bgg_id),
            Value::str(&self.poll_title),
            Value::str(&self.poll_answer),
        ];
        row.extend(stamp_values(stamp, RecordKind::Poll, false));
        row
    }
}

// Details rows also carry year/month/day next to the date partition
fn stamp_columns(with_parts: bool) -> Vec<Column> {
    let mut columns = vec![Column::new("date", ColumnType::String)];
    if with_parts {
        columns.push(Column::new("year", ColumnType::Int));
        columns.push(Column::new("month", ColumnType::Int));
        columns.push(Column::new("day", ColumnType::Int));
    }
    columns.push(Column::new("type", ColumnType::String));
    columns
}

fn stamp_values(stamp: &IngestionStamp, kind: RecordKind, with_parts: bool) -> Vec<Value> {
    let mut values = vec![Value::str(stamp.date_string())];
    if with_parts {
        values.push(Value::Int(stamp.year()));
        values.push(Value::Int(stamp.month()));
        values.push(Value::Int(stamp.day()));
    }
    values.push(Value::str(kind.as_str()));
    values
}
