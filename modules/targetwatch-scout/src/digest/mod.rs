//! Digest synthesis: turns a run's new raw items into one report, unless an
//! identical report (same contributing item set) already exists.

pub mod deterministic;
pub mod generative;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use targetwatch_common::{
    digest_fingerprint, significance_counts, DigestCategory, DigestItem, DigestRun, RawItem,
    ScanRun, Significance, SourceReference, WatchTarget,
};

use crate::traits::ScanStore;

pub use deterministic::DeterministicStrategy;
pub use generative::GenerativeStrategy;

/// One digest entry before it is tied to a persisted run.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEntry {
    pub raw_item_ids: Vec<Uuid>,
    pub category: DigestCategory,
    pub significance: Significance,
    pub headline: String,
    pub synthesis: String,
    pub strategic_note: Option<String>,
    pub sources: Vec<SourceReference>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestDraft {
    pub executive_summary: Option<String>,
    pub entries: Vec<DraftEntry>,
}

impl DigestDraft {
    /// Every raw item id referenced by any entry.
    pub fn contributing_ids(&self) -> Vec<Uuid> {
        self.entries
            .iter()
            .flat_map(|e| e.raw_item_ids.iter().copied())
            .collect()
    }
}

#[async_trait]
pub trait DigestStrategy: Send + Sync {
    async fn compose(&self, items: &[RawItem], targets: &[WatchTarget]) -> Result<DigestDraft>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigestOutcome {
    Created(DigestRun),
    /// A run with this fingerprint already exists; nothing was written.
    Suppressed { fingerprint: String },
    /// Nothing to report.
    Empty,
}

pub struct DigestSynthesizer {
    store: Arc<dyn ScanStore>,
    strategy: Arc<dyn DigestStrategy>,
}

impl DigestSynthesizer {
    pub fn new(store: Arc<dyn ScanStore>, strategy: Arc<dyn DigestStrategy>) -> Self {
        Self { store, strategy }
    }

    pub async fn synthesize(
        &self,
        scan_run: &ScanRun,
        items: &[RawItem],
        targets: &[WatchTarget],
    ) -> Result<DigestOutcome> {
        if items.is_empty() {
            info!(scan_run_id = %scan_run.id, period = %scan_run.period, "No new items, no digest");
            return Ok(DigestOutcome::Empty);
        }

        let draft = self.strategy.compose(items, targets).await?;
        let ids = draft.contributing_ids();
        if ids.is_empty() {
            return Ok(DigestOutcome::Empty);
        }

        let fingerprint = digest_fingerprint(&ids);
        if let Some(existing) = self.store.digest_run_by_fingerprint(&fingerprint).await? {
            info!(%fingerprint, existing = %existing.id, "Identical digest exists, suppressing");
            return Ok(DigestOutcome::Suppressed { fingerprint });
        }

        let run_id = Uuid::new_v4();
        let entries: Vec<DigestItem> = draft
            .entries
            .into_iter()
            .map(|e| DigestItem {
                id: Uuid::new_v4(),
                digest_run_id: run_id,
                raw_item_ids: e.raw_item_ids,
                category: e.category,
                significance: e.significance,
                headline: e.headline,
                synthesis: e.synthesis,
                strategic_note: e.strategic_note,
                sources: e.sources,
                feedback: None,
            })
            .collect();
        let (critical, high, low) = significance_counts(&entries);

        let run = DigestRun {
            id: run_id,
            scan_run_id: scan_run.id,
            period: scan_run.period,
            fingerprint: fingerprint.clone(),
            executive_summary: draft.executive_summary,
            critical_count: critical,
            high_count: high,
            low_count: low,
            item_count: entries.len() as u32,
            created_at: Utc::now(),
        };

        if !self.store.insert_digest(&run, &entries).await? {
            info!(%fingerprint, "Digest with this fingerprint was written concurrently, suppressing");
            return Ok(DigestOutcome::Suppressed { fingerprint });
        }

        info!(
            digest_run_id = %run.id,
            items = run.item_count,
            critical,
            high,
            low,
            "Digest created"
        );
        Ok(DigestOutcome::Created(run))
    }
}
