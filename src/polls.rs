// 🗳️ Poll Flattener + Result Resolver
// suggested_numplayers fans out to one row per player-count segment; every
// other poll resolves its first results group. Zero-vote polls are "N/A".

use crate::document::XmlNode;
use crate::error::FlattenError;
use crate::flatten::{item_id, ItemFlattener};
use crate::records::{IngestionStamp, PollRecord, RecordKind, NOT_AVAILABLE};
use crate::table::{Column, Value};

/// Poll that is split per player count
pub const SUGGESTED_NUMPLAYERS: &str = "suggested_numplayers";

// ============================================================================
// RESOLVER
// ============================================================================

/// One answer of a results group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub value: String,
    pub votes: u64,
}

impl PollResult {
    pub fn new(value: &str, votes: u64) -> Self {
        PollResult {
            value: value.to_string(),
            votes,
        }
    }
}

/// Answer with the strictly greatest vote count; the first maximum wins ties.
/// None for an empty group.
pub fn poll_winner(results: &[PollResult]) -> Option<&str> {
    let mut best: Option<&PollResult> = None;

    for result in results {
        match best {
            Some(current) if result.votes <= current.votes => {}
            _ => best = Some(result),
        }
    }

    best.map(|r| r.value.as_str())
}

/// Read a <results> group. A repeated answer keeps its first position and
/// takes the later vote count.
pub fn read_results(
    id: &str,
    poll: &str,
    results: &XmlNode,
) -> Result<Vec<PollResult>, FlattenError> {
    let mut out: Vec<PollResult> = Vec::new();

    for result in results.find_all("result") {
        let value = result.attr("value").ok_or_else(|| FlattenError::MissingField {
            item_id: id.to_string(),
            field: format!("{}.result.value", poll),
        })?;
        let raw_votes = result.attr("numvotes").ok_or_else(|| FlattenError::MissingField {
            item_id: id.to_string(),
            field: format!("{}.result.numvotes", poll),
        })?;
        let votes = raw_votes
            .trim()
            .parse::<u64>()
            .map_err(|_| FlattenError::InvalidNumber {
                item_id: id.to_string(),
                field: format!("{}.result.numvotes", poll),
                value: raw_votes.to_string(),
            })?;

        match out.iter_mut().find(|r| r.value == value) {
            Some(existing) => existing.votes = votes,
            None => out.push(PollResult::new(value, votes)),
        }
    }

    Ok(out)
}

fn resolve(id: &str, poll: &str, results: Option<&XmlNode>) -> Result<String, FlattenError> {
    let empty = || FlattenError::EmptyPoll {
        item_id: id.to_string(),
        poll: poll.to_string(),
    };

    let group = read_results(id, poll, results.ok_or_else(empty)?)?;
    poll_winner(&group).map(str::to_string).ok_or_else(empty)
}

// ============================================================================
// FLATTENER
// ============================================================================

pub struct PollFlattener;

impl PollFlattener {
    pub fn new() -> Self {
        PollFlattener
    }
}

impl Default for PollFlattener {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemFlattener for PollFlattener {
    fn kind(&self) -> RecordKind {
        RecordKind::Poll
    }

    fn schema(&self) -> Vec<Column> {
        PollRecord::schema()
    }

    fn flatten_item(
        &self,
        item: &XmlNode,
        stamp: &IngestionStamp,
    ) -> Result<Vec<Vec<Value>>, FlattenError> {
        Ok(parse_polls(item)?
            .iter()
            .map(|poll| poll.to_row(stamp))
            .collect())
    }
}

/// All poll rows for one item
pub fn parse_polls(item: &XmlNode) -> Result<Vec<PollRecord>, FlattenError> {
    let id = item_id(item)?;
    let mut records = Vec::new();

    for poll in item.find_all("poll") {
        let name = poll.attr("name").ok_or_else(|| FlattenError::MissingField {
            item_id: id.to_string(),
            field: "poll.name".to_string(),
        })?;
        let total_votes = poll.attr("totalvotes").ok_or_else(|| FlattenError::MissingField {
            item_id: id.to_string(),
            field: format!("{}.totalvotes", name),
        })?;
        let has_votes = total_votes.trim() != "0";

        if name == SUGGESTED_NUMPLAYERS && has_votes {
            for results in poll.find_all("results") {
                let segment = results.attr("numplayers").unwrap_or(NOT_AVAILABLE);
                records.push(PollRecord {
                    bgg_id: id.to_string(),
                    poll_title: format!("{} - {}", name, segment),
                    poll_answer: resolve(id, name, Some(results))?,
                });
            }
            continue;
        }

        let poll_answer = if has_votes {
            resolve(id, name, poll.find("results"))?
        } else {
            NOT_AVAILABLE.to_string()
        };

        records.push(PollRecord {
            bgg_id: id.to_string(),
            poll_title: name.to_string(),
            poll_answer,
        });
    }

    Ok(records)
}
