//! Deduplicating ingest: candidates become RawItems only if (source, external_id) is new.

use anyhow::Result;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use targetwatch_common::RawItem;

use crate::sources::CandidateItem;
use crate::traits::ScanStore;

#[derive(Debug, Default)]
pub struct IngestReport {
    pub found: u32,
    pub new: u32,
    pub inserted: Vec<RawItem>,
}

fn to_raw_item(scan_run_id: Uuid, source: &str, c: CandidateItem) -> RawItem {
    RawItem {
        id: Uuid::new_v4(),
        scan_run_id,
        target_id: c.target_id,
        source: source.to_string(),
        external_id: c.external_id,
        title: c.title,
        url: c.url,
        abstract_text: c.abstract_text,
        full_text: c.full_text,
        published_at: c.published_at,
        metadata: c.metadata,
        is_new: true,
        feedback: None,
        created_at: Utc::now(),
    }
}

/// Store every candidate not already known for `source`.
///
/// Known items are skipped without touching the stored row or the counters.
pub async fn ingest(
    store: &dyn ScanStore,
    scan_run_id: Uuid,
    source: &str,
    candidates: Vec<CandidateItem>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for candidate in candidates {
        if store
            .find_raw_item(source, &candidate.external_id)
            .await?
            .is_some()
        {
            debug!(source, external_id = %candidate.external_id, "Already ingested");
            continue;
        }

        let item = to_raw_item(scan_run_id, source, candidate);
        // The unique constraint still guards a concurrent insert between find and insert.
        if store.insert_raw_item(&item).await? {
            report.found += 1;
            report.new += 1;
            report.inserted.push(item);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, target, MemoryStore};

    #[tokio::test]
    async fn second_ingest_of_same_item_adds_nothing() {
        let store = MemoryStore::new();
        let t = target("x");
        let run = Uuid::new_v4();

        let first = ingest(&store, run, "pubmed", vec![candidate(t.id, "42", "Paper")])
            .await
            .unwrap();
        assert_eq!((first.found, first.new), (1, 1));
        assert!(first.inserted[0].is_new);

        let second = ingest(&store, run, "pubmed", vec![candidate(t.id, "42", "Paper v2")])
            .await
            .unwrap();
        assert_eq!((second.found, second.new), (0, 0));
        assert_eq!(store.raw_items().len(), 1);
        assert_eq!(store.raw_items()[0].title, "Paper");
    }

    #[tokio::test]
    async fn same_external_id_from_another_source_is_distinct() {
        let store = MemoryStore::new();
        let t = target("x");
        let run = Uuid::new_v4();

        ingest(&store, run, "pubmed", vec![candidate(t.id, "42", "a")]).await.unwrap();
        let other = ingest(&store, run, "newsapi", vec![candidate(t.id, "42", "a")])
            .await
            .unwrap();
        assert_eq!(other.new, 1);
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_collapse() {
        let store = MemoryStore::new();
        let t = target("x");
        let report = ingest(
            &store,
            Uuid::new_v4(),
            "pubmed",
            vec![candidate(t.id, "1", "a"), candidate(t.id, "1", "a")],
        )
        .await
        .unwrap();
        assert_eq!(report.new, 1);
    }
}
