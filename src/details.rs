// 🎲 Details Flattener
// One row per item: descriptive fields, player/playtime bounds, rating
// statistics and the rank list.

use crate::document::XmlNode;
use crate::error::FlattenError;
use crate::flatten::{item_id, ItemFlattener};
use crate::records::{DetailsRecord, IngestionStamp, RankEntry, RecordKind, NOT_AVAILABLE};
use crate::table::{Column, Value};

/// Rank value BGG uses for unranked items
pub const NOT_RANKED: &str = "Not Ranked";

pub struct DetailsFlattener {
    subdomain_slots: usize,
}

impl DetailsFlattener {
    pub fn new(subdomain_slots: usize) -> Self {
        DetailsFlattener { subdomain_slots }
    }
}

impl ItemFlattener for DetailsFlattener {
    fn kind(&self) -> RecordKind {
        RecordKind::Details
    }

    fn schema(&self) -> Vec<Column> {
        DetailsRecord::schema(self.subdomain_slots)
    }

    fn flatten_item(
        &self,
        item: &XmlNode,
        stamp: &IngestionStamp,
    ) -> Result<Vec<Vec<Value>>, FlattenError> {
        let record = parse_details(item)?;
        Ok(vec![record.to_row(stamp, self.subdomain_slots)])
    }
}

// ============================================================================
// FIELD CONVERSION
// ============================================================================

/// Required integer: missing or unparsable is an error
fn required_int(id: &str, field: &str, raw: Option<&str>) -> Result<i64, FlattenError> {
    let raw = raw.ok_or_else(|| missing(id, field))?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| invalid(id, field, raw))
}

fn required_float(id: &str, field: &str, raw: Option<&str>) -> Result<f64, FlattenError> {
    let raw = raw.ok_or_else(|| missing(id, field))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| invalid(id, field, raw))
}

/// Rank value: "Not Ranked" → 0, otherwise a non-negative integer
pub fn parse_rank(id: &str, field: &str, raw: &str) -> Result<u32, FlattenError> {
    let value = raw.trim();
    if value == NOT_RANKED {
        return Ok(0);
    }
    value.parse::<u32>().map_err(|_| invalid(id, field, raw))
}

fn missing(id: &str, field: &str) -> FlattenError {
    FlattenError::MissingField {
        item_id: id.to_string(),
        field: field.to_string(),
    }
}

fn invalid(id: &str, field: &str, raw: &str) -> FlattenError {
    FlattenError::InvalidNumber {
        item_id: id.to_string(),
        field: field.to_string(),
        value: raw.to_string(),
    }
}

// ============================================================================
// ITEM PARSING
// ============================================================================

/// Overall rank + ordered sub-domain ranks. A missing rank list means unranked.
pub fn parse_ranks(id: &str, ratings: Option<&XmlNode>) -> Result<(u32, Vec<RankEntry>), FlattenError> {
    let Some(ranks) = ratings.and_then(|r| r.find("ranks")) else {
        return Ok((0, Vec::new()));
    };

    let mut entries = ranks.find_all("rank");

    let overall = match entries.next().and_then(|rank| rank.attr("value")) {
        Some(raw) => parse_rank(id, "bgg_rank", raw)?,
        None => 0,
    };

    let subdomains = entries
        .enumerate()
        .map(|(i, rank)| {
            let field = format!("subdomain_{}_rank", i + 1);
            let value = match rank.attr("value") {
                Some(raw) => parse_rank(id, &field, raw)?,
                None => 0,
            };
            Ok::<_, FlattenError>(RankEntry {
                friendly_name: rank
                    .attr("friendlyname")
                    .unwrap_or(NOT_AVAILABLE)
                    .to_string(),
                value,
            })
        })
        .collect::<Result<Vec<_>, FlattenError>>()?;

    Ok((overall, subdomains))
}

pub fn parse_details(item: &XmlNode) -> Result<DetailsRecord, FlattenError> {
    let id = item_id(item)?;
    let value_of = |tag: &str| item.child_attr(tag, "value");

    // First statistics/ratings block only
    let ratings = item.find_path("statistics/ratings");
    let stat = |tag: &str| ratings.and_then(|r| r.child_attr(tag, "value"));

    let (bgg_rank, subdomains) = parse_ranks(id, ratings)?;

    let record = DetailsRecord {
        bgg_id: id.to_string(),
        bgg_type: item.attr("type").map(str::to_string),
        name: value_of("name").map(str::to_string),
        img_src: item
            .child_text("image")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        description: item.child_text("description").map(str::to_string),
        year_published: required_int(id, "year_published", value_of("yearpublished"))?,
        min_players: required_int(id, "min_players", value_of("minplayers"))?,
        max_players: required_int(id, "max_players", value_of("maxplayers"))?,
        playing_time: required_int(id, "playing_time", value_of("playingtime"))?,
        min_playtime: required_int(id, "min_playtime", value_of("minplaytime"))?,
        max_playtime: required_int(id, "max_playtime", value_of("maxplaytime"))?,
        min_age: required_int(id, "min_age", value_of("minage"))?,
        users_rated: required_int(id, "users_rated", stat("usersrated"))?,
        average: required_float(id, "average", stat("average"))?,
        bayes_average: required_float(id, "bayes_average", stat("bayesaverage"))?,
        num_weights: required_int(id, "num_weights", stat("numweights"))?,
        average_weight: required_float(id, "average_weight", stat("averageweight"))?,
        bgg_rank,
        num_owners: required_int(id, "num_owners", stat("owned"))?,
        subdomains,
    };

    log::debug!(
        "item {}: rank {} with {} sub-domain ranks",
        record.bgg_id,
        record.bgg_rank,
        record.subdomains.len()
    );

    Ok(record)
}
