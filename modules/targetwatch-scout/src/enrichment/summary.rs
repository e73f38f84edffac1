//! Summary enrichment: one factual sentence for items that arrived without text.

use ai_client::Claude;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use targetwatch_common::truncate;

use crate::sources::CandidateItem;

pub const BATCH_SIZE: usize = 8;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// One sentence per item, in input order.
    async fn summarize(&self, items: &[CandidateItem]) -> Result<Vec<String>>;
}

#[derive(Deserialize, JsonSchema)]
struct SummaryResponse {
    /// One factual sentence per numbered item, in the same order.
    summaries: Vec<String>,
}

const SUMMARY_SYSTEM: &str = "\
Write exactly one factual sentence per numbered item describing what it reports.\n\
Use only the title and any metadata given. Do not speculate or add opinions.\n\
Return the sentences in the same order as the items.";

pub struct ClaudeSummarizer {
    claude: Claude,
}

impl ClaudeSummarizer {
    pub fn new(claude: Claude) -> Self {
        Self { claude }
    }
}

fn item_line(index: usize, item: &CandidateItem) -> String {
    let mut line = format!("{}. {}", index + 1, item.title);
    for key in ["journal", "outlet", "status"] {
        if let Some(v) = item.metadata.get(key).and_then(|v| v.as_str()) {
            line.push_str(&format!(" [{key}: {}]", truncate(v, 80)));
        }
    }
    line
}

#[async_trait]
impl Summarizer for ClaudeSummarizer {
    async fn summarize(&self, items: &[CandidateItem]) -> Result<Vec<String>> {
        let list = items
            .iter()
            .enumerate()
            .map(|(i, item)| item_line(i, item))
            .collect::<Vec<_>>()
            .join("\n");
        let response = self
            .claude
            .extract::<SummaryResponse>(SUMMARY_SYSTEM, format!("Items:\n{list}"))
            .await?;
        Ok(response.summaries)
    }
}

/// Fill `abstract_text` on items that have no text, in batches.
///
/// Items that already carry text are untouched; a failed or mis-sized batch
/// leaves its items as they were.
pub async fn enrich_summaries(summarizer: Option<&dyn Summarizer>, items: &mut [CandidateItem]) {
    let Some(summarizer) = summarizer else {
        return;
    };

    let missing: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.has_text())
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        return;
    }

    let mut filled = 0usize;
    for chunk in missing.chunks(BATCH_SIZE) {
        let batch: Vec<CandidateItem> = chunk.iter().map(|&i| items[i].clone()).collect();
        match summarizer.summarize(&batch).await {
            Ok(sentences) if sentences.len() == chunk.len() => {
                for (&i, sentence) in chunk.iter().zip(sentences) {
                    let sentence = sentence.trim().to_string();
                    if sentence.is_empty() {
                        continue;
                    }
                    let item = &mut items[i];
                    item.abstract_text = Some(sentence);
                    if let Some(meta) = item.metadata.as_object_mut() {
                        meta.insert("summary_generated".into(), serde_json::Value::Bool(true));
                    }
                    filled += 1;
                }
            }
            Ok(sentences) => {
                warn!(expected = chunk.len(), got = sentences.len(), "Summary count mismatch, skipping batch");
            }
            Err(e) => {
                warn!(error = %e, "Summary enrichment failed, skipping batch");
            }
        }
    }

    info!(missing = missing.len(), filled, "Summary enrichment applied");
}
