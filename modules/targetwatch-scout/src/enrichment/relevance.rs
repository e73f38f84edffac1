//! Batch relevance filter: drops candidates that don't clearly serve their
//! target's monitoring goal.
//!
//! Items are grouped per target and sent in batches of [`BATCH_SIZE`]; the
//! classifier must answer with exactly one verdict per item. A failed call or
//! a reply of the wrong length keeps the whole batch (fail-open). With no
//! classifier configured the filter passes everything through.

use std::collections::HashMap;

use ai_client::Claude;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use targetwatch_common::{truncate, WatchTarget, DEFAULT_MONITORING_GOAL};

use crate::sources::CandidateItem;

pub const BATCH_SIZE: usize = 12;

#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    /// One verdict per item, in input order.
    async fn classify(&self, goal: &str, items: &[CandidateItem]) -> Result<Vec<bool>>;
}

#[derive(Deserialize, JsonSchema)]
struct RelevanceResponse {
    /// One boolean per numbered item, in the same order. true = keep.
    verdicts: Vec<bool>,
}

const RELEVANCE_SYSTEM: &str = "\
You screen monitoring results for a life-sciences intelligence analyst.\n\
For each numbered item decide whether it CLEARLY serves the monitoring goal.\n\
Answer false when the item is off-topic, only mentions the target in passing, \
is promotional filler, or when you are unsure.\n\
Return exactly one verdict per item, in order.";

pub struct ClaudeClassifier {
    claude: Claude,
}

impl ClaudeClassifier {
    pub fn new(claude: Claude) -> Self {
        Self { claude }
    }
}

fn numbered_items(items: &[CandidateItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let snippet = item.snippet();
            if snippet.is_empty() {
                format!("{}. {}", i + 1, item.title)
            } else {
                format!("{}. {}\n   {}", i + 1, item.title, truncate(snippet, 400))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl RelevanceClassifier for ClaudeClassifier {
    async fn classify(&self, goal: &str, items: &[CandidateItem]) -> Result<Vec<bool>> {
        let prompt = format!(
            "Monitoring goal: {goal}\n\nItems ({}):\n{}",
            items.len(),
            numbered_items(items)
        );
        let response = self
            .claude
            .extract::<RelevanceResponse>(RELEVANCE_SYSTEM, prompt)
            .await?;
        Ok(response.verdicts)
    }
}

/// Keep only the items the classifier accepts. `None` keeps everything.
pub async fn filter_relevant(
    classifier: Option<&dyn RelevanceClassifier>,
    items: Vec<CandidateItem>,
    targets: &[WatchTarget],
) -> Vec<CandidateItem> {
    let Some(classifier) = classifier else {
        return items;
    };
    if items.is_empty() {
        return items;
    }

    let goals: HashMap<Uuid, &str> = targets.iter().map(|t| (t.id, t.monitoring_goal())).collect();

    // Group by target, keeping first-seen target order and item order.
    let mut order: Vec<Uuid> = Vec::new();
    let mut groups: HashMap<Uuid, Vec<CandidateItem>> = HashMap::new();
    for item in items {
        if !groups.contains_key(&item.target_id) {
            order.push(item.target_id);
        }
        groups.entry(item.target_id).or_default().push(item);
    }

    let mut kept = Vec::new();
    let mut rejected = 0usize;
    for target_id in order {
        let group = groups.remove(&target_id).unwrap_or_default();
        let goal = goals.get(&target_id).copied().unwrap_or(DEFAULT_MONITORING_GOAL);

        for batch in group.chunks(BATCH_SIZE) {
            match classifier.classify(goal, batch).await {
                Ok(verdicts) if verdicts.len() == batch.len() => {
                    for (item, keep) in batch.iter().zip(verdicts) {
                        if keep {
                            kept.push(item.clone());
                        } else {
                            rejected += 1;
                        }
                    }
                }
                Ok(verdicts) => {
                    warn!(
                        expected = batch.len(),
                        got = verdicts.len(),
                        "Relevance verdict count mismatch, keeping batch"
                    );
                    kept.extend_from_slice(batch);
                }
                Err(e) => {
                    warn!(error = %e, "Relevance classifier failed, keeping batch");
                    kept.extend_from_slice(batch);
                }
            }
        }
    }

    info!(kept = kept.len(), rejected, "Relevance filter applied");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, target, PredicateClassifier};

    struct ShortReply;

    #[async_trait]
    impl RelevanceClassifier for ShortReply {
        async fn classify(&self, _goal: &str, _items: &[CandidateItem]) -> Result<Vec<bool>> {
            Ok(vec![false])
        }
    }

    #[tokio::test]
    async fn no_classifier_is_identity() {
        let t = target("x");
        let items = vec![candidate(t.id, "1", "a"), candidate(t.id, "2", "b")];
        let out = filter_relevant(None, items.clone(), &[t]).await;
        assert_eq!(out, items);
    }

    #[tokio::test]
    async fn rejected_items_are_dropped() {
        let t = target("x");
        let items = vec![
            candidate(t.id, "1", "Trial discontinued"),
            candidate(t.id, "2", "Stock moves"),
        ];
        let classifier = PredicateClassifier::new(|i| i.title.contains("discontinued"));

        let out = filter_relevant(Some(&classifier), items, &[t]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].external_id, "1");
    }

    #[tokio::test]
    async fn batches_are_bounded_and_goal_is_per_target() {
        let mut a = target("a");
        a.notes = Some("goal A".into());
        let b = target("b");
        let mut items: Vec<_> = (0..15).map(|i| candidate(a.id, &format!("a{i}"), "t")).collect();
        items.push(candidate(b.id, "b0", "t"));

        let classifier = PredicateClassifier::new(|_| true);
        let out = filter_relevant(Some(&classifier), items, &[a, b]).await;
        assert_eq!(out.len(), 16);

        let calls = classifier.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], ("goal A".to_string(), 12));
        assert_eq!(calls[1], ("goal A".to_string(), 3));
        assert_eq!(calls[2], (DEFAULT_MONITORING_GOAL.to_string(), 1));
    }

    #[tokio::test]
    async fn wrong_length_reply_keeps_batch() {
        let t = target("x");
        let items = vec![candidate(t.id, "1", "a"), candidate(t.id, "2", "b")];
        let out = filter_relevant(Some(&ShortReply), items, &[t]).await;
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn prompt_numbers_items_from_one() {
        let t = target("x");
        let mut second = candidate(t.id, "2", "Second");
        second.abstract_text = Some("details".into());
        let text = numbered_items(&[candidate(t.id, "1", "First"), second]);
        assert_eq!(text, "1. First\n2. Second\n   details");
    }
}
