//! Pattern database: named condition sets over launch context, with rolling
//! outcome statistics. Patterns live in one KV hash keyed by id.

use std::collections::HashMap;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

const MIN_OUTCOMES_FOR_MATCH: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Between,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCondition {
    pub field: String,
    pub operator: Operator,
    /// A number, or `[low, high]` for `between`.
    pub value: serde_json::Value,
}

impl PatternCondition {
    pub fn matches(&self, value: f64) -> bool {
        match self.operator {
            Operator::Between => {
                let Some(bounds) = self.value.as_array() else { return false };
                let (Some(low), Some(high)) =
                    (bounds.first().and_then(|v| v.as_f64()), bounds.get(1).and_then(|v| v.as_f64()))
                else {
                    return false;
                };
                value >= low && value <= high
            }
            op => {
                let Some(target) = self.value.as_f64() else { return false };
                match op {
                    Operator::Gt => value > target,
                    Operator::Lt => value < target,
                    Operator::Eq => (value - target).abs() < f64::EPSILON,
                    Operator::Gte => value >= target,
                    Operator::Lte => value <= target,
                    Operator::Between => unreachable!(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub conditions: Vec<PatternCondition>,
    pub outcome_count: u64,
    pub positive_outcomes: u64,
    pub negative_outcomes: u64,
    pub avg_return_percent: f64,
    pub avg_hold_duration_ms: f64,
    pub last_matched_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl Pattern {
    pub fn new(id: &str, name: &str, conditions: Vec<PatternCondition>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            conditions,
            outcome_count: 0,
            positive_outcomes: 0,
            negative_outcomes: 0,
            avg_return_percent: 0.0,
            avg_hold_duration_ms: 0.0,
            last_matched_at_ms: None,
            created_at_ms: aegis_core::now_ms(),
        }
    }

    /// Every condition must match; a missing context field never matches.
    pub fn matches(&self, context: &HashMap<String, f64>) -> bool {
        self.conditions.iter().all(|c| context.get(&c.field).is_some_and(|v| c.matches(*v)))
    }

    pub fn hit_rate(&self) -> f64 {
        if self.outcome_count == 0 {
            return 0.0;
        }
        self.positive_outcomes as f64 / self.outcome_count as f64
    }

    /// Ranking weight: bigger samples with better hit rates first.
    pub fn strength(&self) -> f64 {
        self.outcome_count as f64 * self.hit_rate()
    }

    /// Fold one more observed outcome into the rolling means.
    pub fn apply_outcome(&mut self, return_percent: f64, hold_duration_ms: f64, positive: bool) {
        self.outcome_count += 1;
        if positive {
            self.positive_outcomes += 1;
        } else {
            self.negative_outcomes += 1;
        }
        let n = self.outcome_count as f64;
        self.avg_return_percent = (self.avg_return_percent * (n - 1.0) + return_percent) / n;
        self.avg_hold_duration_ms = (self.avg_hold_duration_ms * (n - 1.0) + hold_duration_ms) / n;
        self.last_matched_at_ms = Some(aegis_core::now_ms());
    }
}

pub struct PatternDatabase {
    conn: MultiplexedConnection,
    key: String,
}

impl PatternDatabase {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self { conn, key: format!("{prefix}:patterns") }
    }

    pub async fn upsert_pattern(&self, pattern: &Pattern) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(pattern)?;
        let _: () = conn.hset(&self.key, &pattern.id, json).await.context("storing pattern")?;
        Ok(())
    }

    pub async fn get_pattern(&self, id: &str) -> Result<Option<Pattern>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.key, id).await.context("reading pattern")?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    pub async fn all_patterns(&self) -> Result<Vec<Pattern>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> =
            conn.hgetall(&self.key).await.context("reading patterns")?;
        Ok(raw.values().filter_map(|json| serde_json::from_str(json).ok()).collect())
    }

    /// Matching patterns with enough history, strongest first.
    pub async fn find_matches(&self, context: &HashMap<String, f64>) -> Result<Vec<Pattern>> {
        let mut matches: Vec<Pattern> = self
            .all_patterns()
            .await?
            .into_iter()
            .filter(|p| p.outcome_count >= MIN_OUTCOMES_FOR_MATCH)
            .filter(|p| p.matches(context))
            .collect();
        matches.sort_by(|a, b| {
            b.strength().partial_cmp(&a.strength()).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    /// Update a pattern's rolling stats after a closed decision.
    pub async fn record_outcome(
        &self,
        pattern_id: &str,
        return_percent: f64,
        hold_duration_ms: f64,
        positive: bool,
    ) -> Result<()> {
        let Some(mut pattern) = self.get_pattern(pattern_id).await? else {
            return Ok(());
        };
        pattern.apply_outcome(return_percent, hold_duration_ms, positive);
        self.upsert_pattern(&pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn all_six_operators() {
        let cases = [
            (Operator::Gt, json!(10.0), 11.0, true),
            (Operator::Gt, json!(10.0), 10.0, false),
            (Operator::Lt, json!(10.0), 9.0, true),
            (Operator::Eq, json!(10.0), 10.0, true),
            (Operator::Eq, json!(10.0), 10.5, false),
            (Operator::Gte, json!(10.0), 10.0, true),
            (Operator::Lte, json!(10.0), 10.0, true),
            (Operator::Lte, json!(10.0), 10.1, false),
            (Operator::Between, json!([5.0, 15.0]), 10.0, true),
            (Operator::Between, json!([5.0, 15.0]), 4.9, false),
            (Operator::Between, json!([5.0, 15.0]), 15.0, true),
        ];
        for (operator, value, input, expected) in cases {
            let cond = PatternCondition { field: "x".into(), operator, value };
            assert_eq!(cond.matches(input), expected, "{operator:?} vs {input}");
        }
    }

    #[test]
    fn pattern_requires_every_condition_and_field() {
        let pattern = Pattern::new(
            "p1",
            "young deployer with deep curve",
            vec![
                PatternCondition { field: "deployer_score".into(), operator: Operator::Gte, value: json!(40.0) },
                PatternCondition { field: "cluster_size".into(), operator: Operator::Lt, value: json!(5.0) },
            ],
        );

        assert!(pattern.matches(&ctx(&[("deployer_score", 55.0), ("cluster_size", 2.0)])));
        assert!(!pattern.matches(&ctx(&[("deployer_score", 30.0), ("cluster_size", 2.0)])));
        // missing field never matches
        assert!(!pattern.matches(&ctx(&[("deployer_score", 55.0)])));
    }

    #[test]
    fn rolling_means_use_the_incremental_formula() {
        let mut pattern = Pattern::new("p1", "test", Vec::new());
        pattern.apply_outcome(10.0, 1_000.0, true);
        pattern.apply_outcome(20.0, 3_000.0, true);
        pattern.apply_outcome(-6.0, 2_000.0, false);

        assert_eq!(pattern.outcome_count, 3);
        assert_eq!(pattern.positive_outcomes, 2);
        assert_eq!(pattern.negative_outcomes, 1);
        assert!((pattern.avg_return_percent - 8.0).abs() < 1e-9);
        assert!((pattern.avg_hold_duration_ms - 2_000.0).abs() < 1e-9);
        assert!(pattern.last_matched_at_ms.is_some());
    }

    #[test]
    fn strength_ranks_sample_size_times_hit_rate() {
        let mut small = Pattern::new("small", "small", Vec::new());
        for _ in 0..4 {
            small.apply_outcome(5.0, 1.0, true);
        }
        let mut big = Pattern::new("big", "big", Vec::new());
        for i in 0..10 {
            big.apply_outcome(5.0, 1.0, i % 2 == 0);
        }

        // 4 * 1.0 = 4 vs 10 * 0.5 = 5
        assert!(big.strength() > small.strength());
    }
}
