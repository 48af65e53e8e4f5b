//! Read-time queries over the cached records.
//!
//! Three shapes: a single entity, a pattern-filtered set, and summed totals
//! with optional percentage conversion. The `TOTAL` row written by the stats
//! command is skipped whenever a query computes its own sums, and used when a
//! query asks for the system-wide figure directly.

use std::str::FromStr;

use regex::Regex;
use serde::Serialize;

use crate::model::{Counters, Record, TOTAL_ENTITY};

/// Target token meaning "every entity except `TOTAL`".
pub const ALL_TARGET: &str = "ALL";

/// Error type for query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// No record has this entity id.
    NotFound(String),
    /// More than one record has this entity id.
    Ambiguous { entity_id: String, count: usize },
    /// The filter pattern is not a valid regular expression.
    InvalidPattern { pattern: String, message: String },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::NotFound(id) => write!(f, "entity '{}' not found in cache", id),
            QueryError::Ambiguous { entity_id, count } => {
                write!(f, "entity '{}' appears {} times in cache", entity_id, count)
            }
            QueryError::InvalidPattern { pattern, message } => {
                write!(f, "invalid pattern '{}': {}", pattern, message)
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// Which records a query covers.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Exactly one entity, matched on the whole id.
    Entity(String),
    /// Every entity except `TOTAL`.
    All,
    /// Entities whose id matches `pattern`, `TOTAL` excluded.
    Pattern { pattern: Regex, description: String },
}

impl Selector {
    /// Maps a CLI target to a selector.
    ///
    /// A `pattern` always wins; otherwise `ALL` selects everything and any
    /// other target names a single entity.
    pub fn parse(
        target: &str,
        pattern: Option<&str>,
        description: Option<&str>,
    ) -> Result<Self, QueryError> {
        if let Some(pattern) = pattern {
            let regex = Regex::new(pattern).map_err(|e| QueryError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            return Ok(Selector::Pattern {
                pattern: regex,
                description: description.unwrap_or(target).to_string(),
            });
        }
        if target == ALL_TARGET {
            Ok(Selector::All)
        } else {
            Ok(Selector::Entity(target.to_string()))
        }
    }

    /// Human-readable name of the selection.
    pub fn describe(&self) -> &str {
        match self {
            Selector::Entity(id) => id,
            Selector::All => "all entities",
            Selector::Pattern { description, .. } => description,
        }
    }
}

/// Finds the record whose entity id equals `entity_id` exactly.
pub fn find_entity<'a>(records: &'a [Record], entity_id: &str) -> Result<&'a Record, QueryError> {
    let mut matches = records.iter().filter(|r| r.entity_id == entity_id);
    let first = matches
        .next()
        .ok_or_else(|| QueryError::NotFound(entity_id.to_string()))?;
    let extra = matches.count();
    if extra > 0 {
        return Err(QueryError::Ambiguous {
            entity_id: entity_id.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}

/// Returns the records covered by `selector`, in cache order.
///
/// For [`Selector::Entity`] this is every exact match, possibly none.
pub fn select<'a>(records: &'a [Record], selector: &Selector) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|r| match selector {
            Selector::Entity(id) => r.entity_id == *id,
            Selector::All => !r.is_total(),
            Selector::Pattern { pattern, .. } => !r.is_total() && pattern.is_match(&r.entity_id),
        })
        .collect()
}

/// Sums the counters of `records`, skipping the `TOTAL` row.
pub fn sum_counters<'a>(records: impl IntoIterator<Item = &'a Record>) -> Counters {
    records
        .into_iter()
        .filter(|r| !r.is_total())
        .fold(Counters::default(), |acc, r| acc + r.counters)
}

/// `part` as a percentage of `whole`; zero when either is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if part == 0 || whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Whether a breakdown holds raw counts or shares of the grand sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownMode {
    Raw,
    Percent,
}

/// Six labeled category values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub mode: BreakdownMode,
    pub values: Vec<(String, f64)>,
}

impl Counters {
    /// Labeled values of the six categories, raw or as percentages of
    /// [`Counters::total`].
    pub fn breakdown(&self, mode: BreakdownMode) -> Breakdown {
        let whole = self.total();
        let values = Counters::LABELS
            .iter()
            .zip(self.as_array())
            .map(|(label, count)| {
                let value = match mode {
                    BreakdownMode::Raw => count as f64,
                    BreakdownMode::Percent => percentage(count, whole),
                };
                (label.to_string(), value)
            })
            .collect();
        Breakdown { mode, values }
    }
}

/// Graph kinds the presentation layer can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// Overall accuracy (OCA).
    Accuracy,
    /// Category shares in percent.
    Processed,
    /// Category counts.
    AbsProcessed,
}

impl GraphKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Accuracy => "accuracy",
            GraphKind::Processed => "processed",
            GraphKind::AbsProcessed => "absprocessed",
        }
    }
}

impl std::fmt::Display for GraphKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accuracy" => Ok(GraphKind::Accuracy),
            "processed" => Ok(GraphKind::Processed),
            "absprocessed" => Ok(GraphKind::AbsProcessed),
            other => Err(format!(
                "unknown graph '{}', expected accuracy, processed or absprocessed",
                other
            )),
        }
    }
}

/// Answer handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryResult {
    Single(f64),
    Pairs(Vec<(String, f64)>),
    Breakdown(Breakdown),
}

impl QueryResult {
    /// Renders `label.value N` lines. `single_label` names a lone value.
    pub fn to_value_lines(&self, single_label: &str) -> Vec<String> {
        match self {
            QueryResult::Single(v) => vec![format!("{}.value {:.2}", single_label, v)],
            QueryResult::Pairs(pairs) => pairs
                .iter()
                .map(|(label, v)| format!("{}.value {:.2}", label, v))
                .collect(),
            QueryResult::Breakdown(b) => b
                .values
                .iter()
                .map(|(label, v)| match b.mode {
                    BreakdownMode::Raw => format!("{}.value {:.0}", label, v),
                    BreakdownMode::Percent => format!("{}.value {:.2}", label, v),
                })
                .collect(),
        }
    }
}

/// Answers `kind` for `selector` over `records`.
pub fn query(
    records: &[Record],
    kind: GraphKind,
    selector: &Selector,
) -> Result<QueryResult, QueryError> {
    match (kind, selector) {
        (GraphKind::Accuracy, Selector::Entity(id)) => {
            Ok(QueryResult::Single(find_entity(records, id)?.oca.value()))
        }
        (GraphKind::Accuracy, Selector::All) => {
            Ok(QueryResult::Single(find_entity(records, TOTAL_ENTITY)?.oca.value()))
        }
        (GraphKind::Accuracy, Selector::Pattern { .. }) => Ok(QueryResult::Pairs(
            select(records, selector)
                .into_iter()
                .map(|r| (r.normalized_id.clone(), r.oca.value()))
                .collect(),
        )),
        (GraphKind::Processed | GraphKind::AbsProcessed, _) => {
            let mode = if kind == GraphKind::Processed {
                BreakdownMode::Percent
            } else {
                BreakdownMode::Raw
            };
            let counters = match selector {
                Selector::Entity(id) => find_entity(records, id)?.counters,
                _ => sum_counters(select(records, selector)),
            };
            Ok(QueryResult::Breakdown(counters.breakdown(mode)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_stats;
    use crate::source::mock::scenarios;

    fn records() -> Vec<Record> {
        parse_stats(scenarios::TYPICAL_OUTPUT).unwrap()
    }

    fn rec(id: &str, tp: u64) -> Record {
        Record::new(
            id,
            Counters {
                tp,
                ..Counters::default()
            },
            0.0,
            0.0,
            0.0,
        )
    }

    #[test]
    fn test_percentage_zero_guards() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(0, 10), 0.0);
        assert_eq!(percentage(10, 0), 0.0);
    }

    #[test]
    fn test_percentage_formula() {
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(10, 10), 100.0);
        assert_eq!(percentage(3, 200), 1.5);
        assert_eq!(percentage(1, 3), 100.0 / 3.0);
    }

    #[test]
    fn test_find_entity() {
        let records = records();
        let bob = find_entity(&records, "bob@example.org").unwrap();
        assert_eq!(bob.counters.tp, 5);

        assert_eq!(
            find_entity(&records, "nobody@example.org").unwrap_err(),
            QueryError::NotFound("nobody@example.org".to_string())
        );
        // Exact match only, no substrings.
        assert!(find_entity(&records, "bob").is_err());
        assert!(find_entity(&records, "example.org").is_err());
    }

    #[test]
    fn test_find_entity_ambiguous() {
        let records = vec![rec("dup", 1), rec("dup", 2), rec("other", 3)];
        assert_eq!(
            find_entity(&records, "dup").unwrap_err(),
            QueryError::Ambiguous {
                entity_id: "dup".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn test_select_all_excludes_total() {
        let records = records();
        let all = select(&records, &Selector::All);
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| !r.is_total()));
    }

    #[test]
    fn test_select_pattern() {
        let records = records();
        let selector = Selector::parse("orgs", Some(r"@example\.org$"), Some("Example org")).unwrap();
        let ids: Vec<&str> = select(&records, &selector)
            .iter()
            .map(|r| r.entity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alice@example.org", "bob@example.org"]);
        assert_eq!(selector.describe(), "Example org");

        // TOTAL never joins a pattern selection.
        let selector = Selector::parse("t", Some("TOTAL"), None).unwrap();
        assert!(select(&records, &selector).is_empty());
    }

    #[test]
    fn test_sum_counters_excludes_total() {
        let records = vec![rec("a", 10), rec("b", 5), rec(TOTAL_ENTITY, 15)];
        let sum = sum_counters(&records);
        assert_eq!(sum.tp, 15);
    }

    #[test]
    fn test_breakdown_percent() {
        let counters = Counters {
            tp: 10,
            tn: 20,
            fp: 1,
            fn_: 2,
            sc: 0,
            nc: 7,
        };
        let b = counters.breakdown(BreakdownMode::Percent);
        assert_eq!(b.values[0], ("tp".to_string(), 25.0));
        assert_eq!(b.values[1], ("tn".to_string(), 50.0));
        assert_eq!(b.values[4], ("sc".to_string(), 0.0));

        let zero = Counters::default().breakdown(BreakdownMode::Percent);
        assert!(zero.values.iter().all(|(_, v)| *v == 0.0));
    }

    #[test]
    fn test_query_accuracy() {
        let records = records();
        let single = query(
            &records,
            GraphKind::Accuracy,
            &Selector::Entity("alice@example.org".to_string()),
        )
        .unwrap();
        assert_eq!(single, QueryResult::Single(90.91));

        // ALL uses the pre-aggregated TOTAL row.
        let all = query(&records, GraphKind::Accuracy, &Selector::All).unwrap();
        assert_eq!(all, QueryResult::Single(94.94));

        let selector = Selector::parse("x", Some("example"), None).unwrap();
        let pairs = query(&records, GraphKind::Accuracy, &selector).unwrap();
        assert_eq!(
            pairs,
            QueryResult::Pairs(vec![
                ("alice_example_org".to_string(), 90.91),
                ("bob_example_org".to_string(), 97.83),
                ("carol_example_net".to_string(), 0.0),
            ])
        );
    }

    #[test]
    fn test_query_accuracy_all_without_total() {
        let records = vec![rec("a", 1)];
        let err = query(&records, GraphKind::Accuracy, &Selector::All).unwrap_err();
        assert_eq!(err, QueryError::NotFound(TOTAL_ENTITY.to_string()));
    }

    #[test]
    fn test_query_absprocessed_all() {
        let records = records();
        let result = query(&records, GraphKind::AbsProcessed, &Selector::All).unwrap();
        let QueryResult::Breakdown(b) = result else {
            panic!("expected breakdown");
        };
        assert_eq!(b.mode, BreakdownMode::Raw);
        let values: Vec<f64> = b.values.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![15.0, 60.0, 1.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_query_sums_saturate_on_huge_counters() {
        let records = vec![rec("a", u64::MAX), rec("b", 1)];
        let result = query(&records, GraphKind::AbsProcessed, &Selector::All).unwrap();
        let QueryResult::Breakdown(b) = result else {
            panic!("expected breakdown");
        };
        assert_eq!(b.values[0].1, u64::MAX as f64);

        let result = query(&records, GraphKind::Processed, &Selector::All).unwrap();
        let QueryResult::Breakdown(b) = result else {
            panic!("expected breakdown");
        };
        assert_eq!(b.values[0].1, 100.0);
        assert_eq!(b.values[1].1, 0.0);
    }

    #[test]
    fn test_query_processed_entity() {
        let records = vec![rec("a", 4)];
        let result = query(&records, GraphKind::Processed, &Selector::Entity("a".into())).unwrap();
        let QueryResult::Breakdown(b) = result else {
            panic!("expected breakdown");
        };
        assert_eq!(b.values[0].1, 100.0);

        let missing = query(&records, GraphKind::Processed, &Selector::Entity("b".into()));
        assert_eq!(missing.unwrap_err(), QueryError::NotFound("b".to_string()));
    }

    #[test]
    fn test_selector_parse() {
        assert!(matches!(Selector::parse("ALL", None, None).unwrap(), Selector::All));
        assert!(matches!(
            Selector::parse("alice@example.org", None, None).unwrap(),
            Selector::Entity(id) if id == "alice@example.org"
        ));
        let err = Selector::parse("p", Some("("), None).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPattern { .. }));
    }

    #[test]
    fn test_graph_kind_from_str() {
        assert_eq!("absprocessed".parse::<GraphKind>().unwrap(), GraphKind::AbsProcessed);
        assert_eq!(GraphKind::Processed.to_string(), "processed");
        assert!("bogus".parse::<GraphKind>().is_err());
    }

    #[test]
    fn test_value_lines() {
        assert_eq!(
            QueryResult::Single(90.91).to_value_lines("oca"),
            vec!["oca.value 90.91"]
        );
        let raw = Counters {
            tp: 15,
            ..Counters::default()
        }
        .breakdown(BreakdownMode::Raw);
        let lines = QueryResult::Breakdown(raw).to_value_lines("unused");
        assert_eq!(lines[0], "tp.value 15");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_query_result_json() {
        let json = serde_json::to_string(&QueryResult::Single(1.5)).unwrap();
        assert_eq!(json, r#"{"kind":"single","data":1.5}"#);
    }
}
