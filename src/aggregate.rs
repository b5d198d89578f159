// 📊 Batch Aggregator
// details + classification (accumulated, append-only) → two analytics tables:
//   analytics                    wide, one row per ranked board game
//   analytics_by_classification  long, one row per (game, mechanic/category)

use crate::table::{Table, Value};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Prefix pattern for `bgg_type` (matched at the start of the value)
    pub type_pattern: String,

    /// Rows with `year_published >= cutoff_year` are dropped
    pub cutoff_year: i64,

    /// Inclusive upper bound on `bgg_rank`; rank 0 (unranked) is always dropped
    pub max_rank: i64,

    /// Prefix patterns for the classification kind
    pub classification_patterns: Vec<String>,

    /// Columns pruned from the wide output
    pub dropped_columns: Vec<String>,

    /// Also prune every `subdomain_{n}` / `subdomain_{n}_rank` column,
    /// whatever the slot count
    pub prune_subdomains: bool,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        AggregateConfig {
            type_pattern: "boardgame".to_string(),
            cutoff_year: 2024,
            max_rank: 5000,
            classification_patterns: vec![
                "boardgamemechanic".to_string(),
                "boardgamecategory".to_string(),
            ],
            dropped_columns: [
                "day",
                "month",
                "year",
                "num_weights",
                "bayes_average",
                "bgg_type",
                "img_src",
                "description",
                "playing_time",
                "min_age",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            prune_subdomains: true,
        }
    }
}

/// Both outputs of one aggregation run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOutput {
    pub analytics: Table,
    pub analytics_by_classification: Table,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct BatchAggregator {
    config: AggregateConfig,
    type_regex: Regex,
    classification_regexes: Vec<Regex>,
    subdomain_regex: Regex,
}

/// Compile a pattern anchored at the start of the value
fn prefix_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .with_context(|| format!("Invalid filter pattern: {}", pattern))
}

fn matches_prefix(regex: &Regex, value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .map(|s| regex.is_match(s))
        .unwrap_or(false)
}

impl BatchAggregator {
    pub fn new(config: AggregateConfig) -> Result<Self> {
        let type_regex = prefix_regex(&config.type_pattern)?;
        let classification_regexes = config
            .classification_patterns
            .iter()
            .map(|p| prefix_regex(p))
            .collect::<Result<Vec<_>>>()?;
        let subdomain_regex = Regex::new(r"^subdomain_\d+(?:_rank)?$")?;

        Ok(BatchAggregator {
            config,
            type_regex,
            classification_regexes,
            subdomain_regex,
        })
    }

    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    /// (a) dedup + (b) filter + (c) prune
    pub fn prepare_details(&self, details: &Table) -> Table {
        let deduped = details.dedup();
        log::debug!(
            "details: {} rows, {} after dedup",
            details.len(),
            deduped.len()
        );

        let filtered = deduped.filter(|row| {
            let year = row.get("year_published").and_then(Value::as_i64);
            let rank = row.get("bgg_rank").and_then(Value::as_i64);

            matches_prefix(&self.type_regex, row.get("bgg_type"))
                && year.map(|y| y < self.config.cutoff_year).unwrap_or(false)
                && rank
                    .map(|r| r > 0 && r <= self.config.max_rank)
                    .unwrap_or(false)
        });

        let mut dropped: Vec<&str> = self.config.dropped_columns.iter().map(String::as_str).collect();
        if self.config.prune_subdomains {
            dropped.extend(
                details
                    .column_names()
                    .into_iter()
                    .filter(|name| self.subdomain_regex.is_match(name)),
            );
        }
        filtered.drop_columns(&dropped)
    }

    /// (d) keep mechanic/category rows, dropping exact replays
    pub fn prepare_classification(&self, classification: &Table) -> Table {
        classification.dedup().filter(|row| {
            self.classification_regexes
                .iter()
                .any(|re| matches_prefix(re, row.get("classification")))
        })
    }

    /// Full run: (a)–(f)
    pub fn run(&self, details: &Table, classification: &Table) -> Result<AnalyticsOutput> {
        let analytics = self.prepare_details(details);
        let links = self.prepare_classification(classification);

        // (e) only id + name travel into the long table; one key row per game
        // even when the game was ingested on several dates
        let keys = analytics
            .select(&["bgg_id", "name"])
            .context("Details table is missing join columns")?
            .dedup();
        let analytics_by_classification = keys
            .inner_join(&links, "bgg_id")
            .context("Failed to join details with classification")?;

        log::info!(
            "Aggregated {} analytics rows, {} classification rows",
            analytics.len(),
            analytics_by_classification.len()
        );

        Ok(AnalyticsOutput {
            analytics,
            analytics_by_classification,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ClassificationRecord, DetailsRecord, IngestionStamp, RankEntry};

    fn stamp() -> IngestionStamp {
        IngestionStamp::parse("2024-01-25").unwrap()
    }

    fn game(id: &str, kind: &str, year: i64, rank: u32) -> DetailsRecord {
        DetailsRecord {
            bgg_id: id.to_string(),
            bgg_type: Some(kind.to_string()),
            name: Some(format!("Game {}", id)),
            img_src: "N/A".to_string(),
            description: Some("desc".to_string()),
            year_published: year,
            min_players: 2,
            max_players: 4,
            playing_time: 60,
            min_playtime: 30,
            max_playtime: 60,
            min_age: 10,
            users_rated: 1000,
            average: 7.5,
            bayes_average: 7.0,
            num_weights: 50,
            average_weight: 2.5,
            bgg_rank: rank,
            num_owners: 3000,
            subdomains: vec![RankEntry {
                friendly_name: "Strategy Game Rank".to_string(),
                value: 10,
            }],
        }
    }

    fn details_table(games: &[DetailsRecord]) -> Table {
        details_on(&stamp(), 2, games)
    }

    fn details_on(on: &IngestionStamp, slots: usize, games: &[DetailsRecord]) -> Table {
        let mut table = Table::new(DetailsRecord::schema(slots));
        for g in games {
            table.push_row(g.to_row(on, slots)).unwrap();
        }
        table
    }

    fn links_table(links: &[(&str, &str, &str)]) -> Table {
        links_on(&stamp(), links)
    }

    fn links_on(on: &IngestionStamp, links: &[(&str, &str, &str)]) -> Table {
        let mut table = Table::new(ClassificationRecord::schema());
        for (id, kind, value) in links {
            let record = ClassificationRecord {
                bgg_id: id.to_string(),
                classification: Some(kind.to_string()),
                value: Some(value.to_string()),
            };
            table.push_row(record.to_row(on)).unwrap();
        }
        table
    }

    fn ids(table: &Table) -> Vec<String> {
        table
            .column_values("bgg_id")
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    fn aggregator() -> BatchAggregator {
        BatchAggregator::new(AggregateConfig::default()).unwrap()
    }

    #[test]
    fn test_rank_boundaries() {
        let details = details_table(&[
            game("1", "boardgame", 2000, 5000),
            game("2", "boardgame", 2000, 5001),
            game("3", "boardgame", 2000, 0),
            game("4", "boardgame", 2000, 1),
        ]);

        assert_eq!(ids(&aggregator().prepare_details(&details)), vec!["1", "4"]);
    }

    #[test]
    fn test_year_cutoff_is_exclusive() {
        let details = details_table(&[
            game("1", "boardgame", 2023, 10),
            game("2", "boardgame", 2024, 10),
            game("3", "boardgame", 2025, 10),
        ]);

        assert_eq!(ids(&aggregator().prepare_details(&details)), vec!["1"]);
    }

    #[test]
    fn test_type_prefix_match() {
        // prefix match: expansions also start with "boardgame"
        let details = details_table(&[
            game("1", "boardgame", 2000, 10),
            game("2", "boardgameexpansion", 2000, 20),
            game("3", "rpgitem", 2000, 30),
        ]);

        assert_eq!(ids(&aggregator().prepare_details(&details)), vec!["1", "2"]);
    }

    #[test]
    fn test_pruned_columns() {
        let details = details_table(&[game("1", "boardgame", 2000, 10)]);
        let analytics = aggregator().prepare_details(&details);

        let names = analytics.column_names();
        for dropped in AggregateConfig::default().dropped_columns {
            assert!(!names.contains(&dropped.as_str()), "{} should be dropped", dropped);
        }
        assert_eq!(
            names,
            vec![
                "bgg_id",
                "name",
                "year_published",
                "min_players",
                "max_players",
                "min_playtime",
                "max_playtime",
                "users_rated",
                "average",
                "average_weight",
                "bgg_rank",
                "num_owners",
                "date",
                "type",
            ]
        );
    }

    #[test]
    fn test_subdomain_columns_pruned_for_any_slot_count() {
        let mut g = game("1", "boardgame", 2000, 10);
        g.subdomains.push(RankEntry {
            friendly_name: "Family Game Rank".to_string(),
            value: 4,
        });
        let details = details_on(&stamp(), 3, &[g]);
        assert!(details.column_index("subdomain_3_rank").is_some());

        let analytics = aggregator().prepare_details(&details);
        assert!(analytics
            .column_names()
            .iter()
            .all(|name| !name.starts_with("subdomain_")));

        let config = AggregateConfig {
            prune_subdomains: false,
            ..Default::default()
        };
        let kept = BatchAggregator::new(config).unwrap().prepare_details(&details);
        assert!(kept.column_index("subdomain_3").is_some());
    }

    #[test]
    fn test_multi_date_input_joins_once_per_link() {
        let day1 = IngestionStamp::parse("2024-01-25").unwrap();
        let day2 = IngestionStamp::parse("2024-01-26").unwrap();
        let g = game("13", "boardgame", 1995, 532);

        let mut details = details_on(&day1, 2, &[g.clone()]);
        details.append(details_on(&day2, 2, &[g])).unwrap();
        let mut links = links_on(&day1, &[("13", "boardgamemechanic", "Dice Rolling")]);
        links
            .append(links_on(&day2, &[("13", "boardgamemechanic", "Dice Rolling")]))
            .unwrap();

        let out = aggregator().run(&details, &links).unwrap();

        assert_eq!(out.analytics.len(), 2);
        let long = &out.analytics_by_classification;
        assert_eq!(long.len(), 2);
        assert_eq!(long.dedup().len(), long.len());
    }

    #[test]
    fn test_exact_duplicates_removed() {
        let g = game("1", "boardgame", 2000, 10);
        let details = details_table(&[g.clone(), g.clone(), g]);

        assert_eq!(aggregator().prepare_details(&details).len(), 1);
    }

    #[test]
    fn test_classification_kind_filter() {
        let links = links_table(&[
            ("1", "boardgamemechanic", "Dice Rolling"),
            ("1", "boardgamecategory", "Economic"),
            ("1", "boardgamedesigner", "Someone"),
            ("1", "boardgamepublisher", "Someone Else"),
        ]);

        let kept = aggregator().prepare_classification(&links);
        let kinds: Vec<String> = kept
            .column_values("classification")
            .iter()
            .map(|v| v.to_string())
            .collect();

        assert_eq!(kinds, vec!["boardgamemechanic", "boardgamecategory"]);
    }

    #[test]
    fn test_join_completeness() {
        let details = details_table(&[
            game("1", "boardgame", 2000, 10),
            game("2", "boardgame", 2000, 20),
            game("3", "boardgame", 2000, 0),
        ]);
        let links = links_table(&[
            ("1", "boardgamemechanic", "Dice Rolling"),
            ("1", "boardgamecategory", "Economic"),
            ("2", "boardgamemechanic", "Worker Placement"),
            ("3", "boardgamemechanic", "Trading"),
            ("4", "boardgamemechanic", "Auction"),
        ]);

        let out = aggregator().run(&details, &links).unwrap();
        let long = &out.analytics_by_classification;

        assert_eq!(
            long.column_names(),
            vec!["bgg_id", "name", "classification", "value", "date", "type"]
        );
        assert_eq!(ids(long), vec!["1", "1", "2"]);

        // every joined row pairs exactly one details row with one link row
        for row in long.iter() {
            let id = row.get("bgg_id").unwrap();
            let value = row.get("value").unwrap();
            let detail_matches = out
                .analytics
                .iter()
                .filter(|d| d.get("bgg_id") == Some(id))
                .count();
            let link_matches = links
                .iter()
                .filter(|l| l.get("bgg_id") == Some(id) && l.get("value") == Some(value))
                .count();
            assert_eq!((detail_matches, link_matches), (1, 1));
        }
        assert_eq!(long.value(0, "type"), Some(&Value::str("classification")));
    }

    #[test]
    fn test_run_is_idempotent() {
        let g = game("1", "boardgame", 2000, 10);
        let details = details_table(&[g.clone(), game("2", "boardgame", 1990, 40), g]);
        let links = links_table(&[
            ("1", "boardgamemechanic", "Dice Rolling"),
            ("1", "boardgamemechanic", "Dice Rolling"),
            ("2", "boardgamecategory", "Economic"),
        ]);

        let agg = aggregator();
        let first = agg.run(&details, &links).unwrap();
        let second = agg.run(&details, &links).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.analytics_by_classification.len(), 2);
    }

    #[test]
    fn test_empty_inputs_are_empty_outputs() {
        let out = aggregator()
            .run(&details_table(&[]), &links_table(&[]))
            .unwrap();

        assert!(out.analytics.is_empty());
        assert!(out.analytics_by_classification.is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = AggregateConfig {
            type_pattern: "board(".to_string(),
            ..Default::default()
        };
        assert!(BatchAggregator::new(config).is_err());
    }

    #[test]
    fn test_custom_thresholds() {
        let config = AggregateConfig {
            cutoff_year: 2030,
            max_rank: 100,
            ..Default::default()
        };
        let details = details_table(&[
            game("1", "boardgame", 2025, 100),
            game("2", "boardgame", 2025, 101),
        ]);

        let kept = BatchAggregator::new(config).unwrap().prepare_details(&details);
        assert_eq!(ids(&kept), vec!["1"]);
    }
}
