//! Storage boundary for the scan pipeline.
//!
//! ScanStore: everything the orchestrator, ingest, digest synthesizer and
//!   scheduler read or write. PgStore implements it for production;
//!   testing::MemoryStore implements it in memory for deterministic tests.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use targetwatch_common::{
    DigestItem, DigestRun, FeedbackSignal, RawItem, ScanRun, ScanRunPatch, Schedule,
    ScheduleMarker, SourceState, WatchTarget,
};
use targetwatch_store::PgStore;

#[async_trait]
pub trait ScanStore: Send + Sync {
    // --- Targets ---

    async fn targets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<WatchTarget>>;

    /// Active targets, optionally limited to one user.
    async fn active_targets(&self, user_id: Option<&str>) -> Result<Vec<WatchTarget>>;

    // --- Scan runs ---

    async fn insert_scan_run(&self, run: &ScanRun) -> Result<()>;

    async fn scan_run(&self, id: Uuid) -> Result<Option<ScanRun>>;

    async fn patch_scan_run(&self, id: Uuid, patch: &ScanRunPatch) -> Result<()>;

    /// Mark a run failed unless it already completed or failed. Returns whether it changed.
    async fn fail_scan_run_if_open(&self, id: Uuid, error: &str) -> Result<bool>;

    async fn set_source_status(
        &self,
        scan_run_id: Uuid,
        source: &str,
        state: SourceState,
        items_found: u32,
        error: Option<&str>,
    ) -> Result<()>;

    // --- Raw items ---

    async fn existing_external_ids(
        &self,
        sources: &[String],
    ) -> Result<HashMap<String, HashSet<String>>>;

    async fn find_raw_item(&self, source: &str, external_id: &str) -> Result<Option<RawItem>>;

    /// Insert unless `(source, external_id)` exists. Returns whether a row was written.
    async fn insert_raw_item(&self, item: &RawItem) -> Result<bool>;

    async fn recent_feedback(&self, user_id: Option<&str>, limit: u32)
        -> Result<Vec<FeedbackSignal>>;

    // --- Digests ---

    async fn digest_run_by_fingerprint(&self, fingerprint: &str) -> Result<Option<DigestRun>>;

    /// Persist run + items together. Returns `false` if the fingerprint is taken.
    async fn insert_digest(&self, run: &DigestRun, items: &[DigestItem]) -> Result<bool>;

    // --- Schedules ---

    async fn enabled_schedules(&self) -> Result<Vec<Schedule>>;

    /// Compare-and-set on a last-trigger marker.
    async fn swap_schedule_marker(
        &self,
        schedule_id: Uuid,
        marker: ScheduleMarker,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool>;
}

#[async_trait]
impl ScanStore for PgStore {
    async fn targets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<WatchTarget>> {
        Ok(self.targets_by_ids(ids).await?)
    }

    async fn active_targets(&self, user_id: Option<&str>) -> Result<Vec<WatchTarget>> {
        Ok(self.active_targets(user_id).await?)
    }

    async fn insert_scan_run(&self, run: &ScanRun) -> Result<()> {
        Ok(self.insert_scan_run(run).await?)
    }

    async fn scan_run(&self, id: Uuid) -> Result<Option<ScanRun>> {
        Ok(self.scan_run(id).await?)
    }

    async fn patch_scan_run(&self, id: Uuid, patch: &ScanRunPatch) -> Result<()> {
        Ok(self.patch_scan_run(id, patch).await?)
    }

    async fn fail_scan_run_if_open(&self, id: Uuid, error: &str) -> Result<bool> {
        Ok(self.fail_scan_run_if_open(id, error).await?)
    }

    async fn set_source_status(
        &self,
        scan_run_id: Uuid,
        source: &str,
        state: SourceState,
        items_found: u32,
        error: Option<&str>,
    ) -> Result<()> {
        Ok(self
            .upsert_source_status(scan_run_id, source, state, items_found, error)
            .await?)
    }

    async fn existing_external_ids(
        &self,
        sources: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        Ok(self.existing_external_ids(sources).await?)
    }

    async fn find_raw_item(&self, source: &str, external_id: &str) -> Result<Option<RawItem>> {
        Ok(self.find_raw_item(source, external_id).await?)
    }

    async fn insert_raw_item(&self, item: &RawItem) -> Result<bool> {
        Ok(self.insert_raw_item(item).await?)
    }

    async fn recent_feedback(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedbackSignal>> {
        Ok(self.recent_feedback(user_id, limit).await?)
    }

    async fn digest_run_by_fingerprint(&self, fingerprint: &str) -> Result<Option<DigestRun>> {
        Ok(self.digest_run_by_fingerprint(fingerprint).await?)
    }

    async fn insert_digest(&self, run: &DigestRun, items: &[DigestItem]) -> Result<bool> {
        Ok(self.insert_digest(run, items).await?)
    }

    async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.enabled_schedules().await?)
    }

    async fn swap_schedule_marker(
        &self,
        schedule_id: Uuid,
        marker: ScheduleMarker,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .swap_schedule_marker(schedule_id, marker, expected, value)
            .await?)
    }
}
