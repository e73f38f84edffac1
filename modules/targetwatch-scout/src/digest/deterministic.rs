//! One digest entry per raw item, no model involved.

use anyhow::Result;
use async_trait::async_trait;

use targetwatch_common::{
    normalize_text, token_jaccard, truncate, DigestCategory, RawItem, Significance,
    SourceReference, WatchTarget,
};

use super::{DigestDraft, DigestStrategy, DraftEntry};

/// Shown instead of a synthesis that would just repeat the headline.
pub const NO_DETAIL_PLACEHOLDER: &str =
    "No further detail was available from the source; open the link for the full record.";

const JACCARD_THRESHOLD: f64 = 0.85;
const CONTAINMENT_MAX_DELTA: usize = 50;
const HEADLINE_CHARS: usize = 200;
const SYNTHESIS_CHARS: usize = 700;

pub fn category_for_source(source: &str) -> DigestCategory {
    match source {
        "clinicaltrials" => DigestCategory::Clinical,
        "pubmed" => DigestCategory::Research,
        "newsapi" | "web_research" => DigestCategory::News,
        _ => DigestCategory::Other,
    }
}

/// Whether `synthesis` just restates `headline`.
///
/// True on a normalized exact match, a token Jaccard of at least 0.85, or
/// when one contains the other and they differ by under 50 characters.
pub fn is_equivalent(headline: &str, synthesis: &str) -> bool {
    let h = normalize_text(headline);
    let s = normalize_text(synthesis);
    if h == s {
        return true;
    }
    if token_jaccard(&h, &s) >= JACCARD_THRESHOLD {
        return true;
    }
    let delta = h.chars().count().abs_diff(s.chars().count());
    !h.is_empty() && !s.is_empty() && (h.contains(&s) || s.contains(&h)) && delta < CONTAINMENT_MAX_DELTA
}

pub fn entry_for(item: &RawItem) -> DraftEntry {
    let headline = truncate(item.title.trim(), HEADLINE_CHARS);
    let body = item.body().unwrap_or(&item.title);
    let synthesis = if is_equivalent(&headline, body) {
        NO_DETAIL_PLACEHOLDER.to_string()
    } else {
        truncate(body.trim(), SYNTHESIS_CHARS)
    };

    DraftEntry {
        raw_item_ids: vec![item.id],
        category: category_for_source(&item.source),
        significance: Significance::Medium,
        headline,
        synthesis,
        strategic_note: None,
        sources: vec![SourceReference {
            source: item.source.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
        }],
    }
}

pub struct DeterministicStrategy;

impl DeterministicStrategy {
    pub fn draft(&self, items: &[RawItem]) -> DigestDraft {
        DigestDraft {
            executive_summary: None,
            entries: items.iter().map(entry_for).collect(),
        }
    }
}

#[async_trait]
impl DigestStrategy for DeterministicStrategy {
    async fn compose(&self, items: &[RawItem], _targets: &[WatchTarget]) -> Result<DigestDraft> {
        Ok(self.draft(items))
    }
}
