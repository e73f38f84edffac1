//! Test doubles for the scan pipeline.
//!
//! One per trait boundary:
//! - MemoryStore (ScanStore): stateful in-memory tables
//! - MockSource (SourceAdapter): canned items/error, optional delay
//! - PredicateClassifier (RelevanceClassifier): closure verdicts, records calls
//! - StaticSummarizer (Summarizer): echo or fixed replies, records batch sizes
//! - FailingStrategy (DigestStrategy): always errors
//! - RecordingTrigger (ScanTrigger): records requests, optionally fails
//!
//! Plus builders for WatchTarget, CandidateItem, RawItem and Schedule.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use targetwatch_common::{
    DigestItem, DigestRun, FeedbackSignal, RawItem, RunStatus, ScanRun, ScanRunPatch, Schedule,
    ScheduleMarker, SourceState, SourceStatus, TargetKind, WatchTarget,
};

use crate::digest::{DigestDraft, DigestStrategy};
use crate::enrichment::{RelevanceClassifier, Summarizer};
use crate::pipeline::orchestrator::ScanRequest;
use crate::scheduling::scheduler::ScanTrigger;
use crate::sources::{CandidateItem, SourceAdapter, SourceContext, SourceOutput};
use crate::traits::ScanStore;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Active drug target owned by user "u1", no aliases or notes.
pub fn target(name: &str) -> WatchTarget {
    WatchTarget {
        id: Uuid::new_v4(),
        user_id: "u1".into(),
        name: name.into(),
        display_name: None,
        aliases: Vec::new(),
        kind: TargetKind::Drug,
        area: None,
        notes: None,
        active: true,
        created_at: Utc::now(),
    }
}

/// Candidate with no text and empty metadata.
pub fn candidate(target_id: Uuid, external_id: &str, title: &str) -> CandidateItem {
    CandidateItem {
        target_id,
        external_id: external_id.into(),
        title: title.into(),
        url: format!("https://example.org/{external_id}"),
        abstract_text: None,
        full_text: None,
        published_at: None,
        metadata: serde_json::json!({}),
    }
}

pub fn raw_item(
    scan_run_id: Uuid,
    target_id: Uuid,
    source: &str,
    external_id: &str,
    title: &str,
) -> RawItem {
    RawItem {
        id: Uuid::new_v4(),
        scan_run_id,
        target_id,
        source: source.into(),
        external_id: external_id.into(),
        title: title.into(),
        url: format!("https://example.org/{source}/{external_id}"),
        abstract_text: None,
        full_text: None,
        published_at: None,
        metadata: serde_json::json!({}),
        is_new: true,
        feedback: None,
        created_at: Utc::now(),
    }
}

/// Global daily schedule at `hour:minute` in `timezone`, weekly disabled.
pub fn daily_schedule(user_id: &str, timezone: &str, hour: u32, minute: u32) -> Schedule {
    Schedule {
        id: Uuid::new_v4(),
        user_id: user_id.into(),
        target_id: None,
        timezone: timezone.into(),
        daily_enabled: true,
        daily_hour: hour,
        daily_minute: minute,
        weekdays_only: false,
        weekly_enabled: false,
        weekly_day_of_week: 1,
        weekly_hour: 9,
        weekly_minute: 0,
        last_daily_run_date: None,
        last_weekly_run_date: None,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreInner {
    targets: Vec<WatchTarget>,
    scan_runs: Vec<ScanRun>,
    source_statuses: Vec<SourceStatus>,
    raw_items: Vec<RawItem>,
    feedback: Vec<FeedbackSignal>,
    digest_runs: Vec<DigestRun>,
    digest_items: Vec<DigestItem>,
    schedules: Vec<Schedule>,
    broken_schedules: HashSet<Uuid>,
}

/// In-memory `ScanStore`. Thread-safe via interior Mutex; uniqueness rules
/// match the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&self, target: WatchTarget) {
        self.inner.lock().unwrap().targets.push(target);
    }

    pub fn add_schedule(&self, schedule: Schedule) {
        self.inner.lock().unwrap().schedules.push(schedule);
    }

    /// Make every marker write for `schedule_id` fail as if the database were down.
    pub fn fail_marker_writes_for(&self, schedule_id: Uuid) {
        self.inner.lock().unwrap().broken_schedules.insert(schedule_id);
    }

    pub fn add_feedback(&self, signal: FeedbackSignal) {
        self.inner.lock().unwrap().feedback.push(signal);
    }

    pub fn add_raw_item(&self, item: RawItem) {
        self.inner.lock().unwrap().raw_items.push(item);
    }

    pub fn raw_items(&self) -> Vec<RawItem> {
        self.inner.lock().unwrap().raw_items.clone()
    }

    pub fn scan_runs(&self) -> Vec<ScanRun> {
        self.inner.lock().unwrap().scan_runs.clone()
    }

    pub fn source_statuses(&self, scan_run_id: Uuid) -> Vec<SourceStatus> {
        self.inner
            .lock()
            .unwrap()
            .source_statuses
            .iter()
            .filter(|s| s.scan_run_id == scan_run_id)
            .cloned()
            .collect()
    }

    pub fn source_state(&self, scan_run_id: Uuid, source: &str) -> Option<SourceState> {
        self.source_statuses(scan_run_id)
            .into_iter()
            .find(|s| s.source == source)
            .map(|s| s.state)
    }

    pub fn digest_runs(&self) -> Vec<DigestRun> {
        self.inner.lock().unwrap().digest_runs.clone()
    }

    pub fn digest_items(&self) -> Vec<DigestItem> {
        self.inner.lock().unwrap().digest_items.clone()
    }

    pub fn schedules(&self) -> Vec<Schedule> {
        self.inner.lock().unwrap().schedules.clone()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn targets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<WatchTarget>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .targets
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn active_targets(&self, user_id: Option<&str>) -> Result<Vec<WatchTarget>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .targets
            .iter()
            .filter(|t| t.active && user_id.map_or(true, |u| t.user_id == u))
            .cloned()
            .collect())
    }

    async fn insert_scan_run(&self, run: &ScanRun) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.scan_runs.iter().any(|r| r.id == run.id) {
            bail!("duplicate scan run {}", run.id);
        }
        inner.scan_runs.push(run.clone());
        Ok(())
    }

    async fn scan_run(&self, id: Uuid) -> Result<Option<ScanRun>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.scan_runs.iter().find(|r| r.id == id).cloned())
    }

    async fn patch_scan_run(&self, id: Uuid, patch: &ScanRunPatch) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.scan_runs.iter_mut().find(|r| r.id == id) {
            Some(run) => {
                patch.apply(run);
                Ok(())
            }
            None => bail!("scan run {id} not found"),
        }
    }

    async fn fail_scan_run_if_open(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(run) = inner.scan_runs.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = RunStatus::Failed;
        run.error = Some(error.to_string());
        run.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn set_source_status(
        &self,
        scan_run_id: Uuid,
        source: &str,
        state: SourceState,
        items_found: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .source_statuses
            .iter_mut()
            .find(|s| s.scan_run_id == scan_run_id && s.source == source);
        match existing {
            Some(status) => {
                status.state = state;
                status.items_found = items_found;
                status.error = error.map(str::to_string);
                status.updated_at = Utc::now();
            }
            None => inner.source_statuses.push(SourceStatus {
                id: Uuid::new_v4(),
                scan_run_id,
                source: source.to_string(),
                state,
                items_found,
                error: error.map(str::to_string),
                updated_at: Utc::now(),
            }),
        }
        Ok(())
    }

    async fn existing_external_ids(
        &self,
        sources: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        let inner = self.inner.lock().unwrap();
        let mut out: HashMap<String, HashSet<String>> = HashMap::new();
        for item in inner.raw_items.iter().filter(|i| sources.contains(&i.source)) {
            out.entry(item.source.clone())
                .or_default()
                .insert(item.external_id.clone());
        }
        Ok(out)
    }

    async fn find_raw_item(&self, source: &str, external_id: &str) -> Result<Option<RawItem>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .raw_items
            .iter()
            .find(|i| i.source == source && i.external_id == external_id)
            .cloned())
    }

    async fn insert_raw_item(&self, item: &RawItem) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .raw_items
            .iter()
            .any(|i| i.source == item.source && i.external_id == item.external_id)
        {
            return Ok(false);
        }
        inner.raw_items.push(item.clone());
        Ok(true)
    }

    async fn recent_feedback(
        &self,
        _user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedbackSignal>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .feedback
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn digest_run_by_fingerprint(&self, fingerprint: &str) -> Result<Option<DigestRun>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .digest_runs
            .iter()
            .find(|r| r.fingerprint == fingerprint)
            .cloned())
    }

    async fn insert_digest(&self, run: &DigestRun, items: &[DigestItem]) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.digest_runs.iter().any(|r| r.fingerprint == run.fingerprint) {
            return Ok(false);
        }
        inner.digest_runs.push(run.clone());
        inner.digest_items.extend(items.iter().cloned());
        Ok(true)
    }

    async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .schedules
            .iter()
            .filter(|s| s.daily_enabled || s.weekly_enabled)
            .cloned()
            .collect())
    }

    async fn swap_schedule_marker(
        &self,
        schedule_id: Uuid,
        marker: ScheduleMarker,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.broken_schedules.contains(&schedule_id) {
            bail!("schedule store unavailable");
        }
        let Some(schedule) = inner.schedules.iter_mut().find(|s| s.id == schedule_id) else {
            return Ok(false);
        };
        let slot = match marker {
            ScheduleMarker::Daily => &mut schedule.last_daily_run_date,
            ScheduleMarker::Weekly => &mut schedule.last_weekly_run_date,
        };
        if slot.as_deref() != expected {
            return Ok(false);
        }
        *slot = value.map(str::to_string);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Adapter returning canned output. Configured, empty and instant by default.
pub struct MockSource {
    id: &'static str,
    configured: bool,
    items: Vec<CandidateItem>,
    error: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<SourceContext>>,
}

impl MockSource {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            configured: true,
            items: Vec::new(),
            error: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn with_items(mut self, items: Vec<CandidateItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contexts this source was run with.
    pub fn calls(&self) -> Vec<SourceContext> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn id(&self) -> &'static str {
        self.id
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn run(&self, ctx: &SourceContext) -> SourceOutput {
        self.calls.lock().unwrap().push(ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        SourceOutput {
            items: self.items.clone(),
            error: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment doubles
// ---------------------------------------------------------------------------

type Predicate = Box<dyn Fn(&CandidateItem) -> bool + Send + Sync>;

/// Keeps items the closure accepts. Records `(goal, batch_len)` per call.
pub struct PredicateClassifier {
    predicate: Predicate,
    calls: Mutex<Vec<(String, usize)>>,
}

impl PredicateClassifier {
    pub fn new(predicate: impl Fn(&CandidateItem) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelevanceClassifier for PredicateClassifier {
    async fn classify(&self, goal: &str, items: &[CandidateItem]) -> Result<Vec<bool>> {
        self.calls
            .lock()
            .unwrap()
            .push((goal.to_string(), items.len()));
        Ok(items.iter().map(|i| (self.predicate)(i)).collect())
    }
}

enum SummaryReply {
    EchoTitles,
    Fixed(Vec<String>),
}

pub struct StaticSummarizer {
    reply: SummaryReply,
    batch_sizes: Mutex<Vec<usize>>,
}

impl StaticSummarizer {
    /// Replies "About {title}." for each item.
    pub fn echo_titles() -> Self {
        Self {
            reply: SummaryReply::EchoTitles,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Replies with the same list regardless of input.
    pub fn fixed(summaries: Vec<String>) -> Self {
        Self {
            reply: SummaryReply::Fixed(summaries),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, items: &[CandidateItem]) -> Result<Vec<String>> {
        self.batch_sizes.lock().unwrap().push(items.len());
        Ok(match &self.reply {
            SummaryReply::EchoTitles => items.iter().map(|i| format!("About {}.", i.title)).collect(),
            SummaryReply::Fixed(s) => s.clone(),
        })
    }
}

pub struct FailingStrategy;

#[async_trait]
impl DigestStrategy for FailingStrategy {
    async fn compose(&self, _items: &[RawItem], _targets: &[WatchTarget]) -> Result<DigestDraft> {
        bail!("digest model unavailable")
    }
}

// ---------------------------------------------------------------------------
// RecordingTrigger
// ---------------------------------------------------------------------------

/// Records every request; returns a fresh id or fails when built with `failing()`.
#[derive(Default)]
pub struct RecordingTrigger {
    fail: bool,
    requests: Mutex<Vec<ScanRequest>>,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ScanRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanTrigger for RecordingTrigger {
    async fn trigger(&self, request: ScanRequest) -> Result<Uuid> {
        self.requests.lock().unwrap().push(request);
        if self.fail {
            bail!("orchestrator unavailable");
        }
        Ok(Uuid::new_v4())
    }
}
