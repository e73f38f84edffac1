use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TargetWatchError;

/// Goal used when a target carries no monitoring notes of its own.
pub const DEFAULT_MONITORING_GOAL: &str = "Material developments: clinical trial starts, \
readouts, halts or discontinuations; regulatory decisions; safety signals; licensing, \
partnership or M&A activity; and significant new publications.";

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Drug,
    Target,
    Company,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Drug => write!(f, "drug"),
            TargetKind::Target => write!(f, "target"),
            TargetKind::Company => write!(f, "company"),
        }
    }
}

impl TargetKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "target" | "biological_target" => Self::Target,
            "company" | "sponsor" => Self::Company,
            _ => Self::Drug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPeriod {
    Daily,
    Weekly,
}

impl std::fmt::Display for ScanPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPeriod::Daily => write!(f, "daily"),
            ScanPeriod::Weekly => write!(f, "weekly"),
        }
    }
}

impl FromStr for ScanPeriod {
    type Err = TargetWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(TargetWatchError::Validation(format!(
                "period must be daily or weekly, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Latest,
    Comprehensive,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Latest => write!(f, "latest"),
            ScanMode::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

impl FromStr for ScanMode {
    type Err = TargetWatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "comprehensive" => Ok(Self::Comprehensive),
            other => Err(TargetWatchError::Validation(format!(
                "mode must be latest or comprehensive, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Pending => write!(f, "pending"),
            SourceState::Running => write!(f, "running"),
            SourceState::Completed => write!(f, "completed"),
            SourceState::Failed => write!(f, "failed"),
            SourceState::Skipped => write!(f, "skipped"),
        }
    }
}

impl SourceState {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Good,
    Bad,
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Good => write!(f, "good"),
            Feedback::Bad => write!(f, "bad"),
        }
    }
}

impl Feedback {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" | "up" => Some(Self::Good),
            "bad" | "down" => Some(Self::Bad),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Significance::Critical => write!(f, "critical"),
            Significance::High => write!(f, "high"),
            Significance::Medium => write!(f, "medium"),
            Significance::Low => write!(f, "low"),
        }
    }
}

impl Significance {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestCategory {
    Clinical,
    Regulatory,
    Research,
    Commercial,
    News,
    Other,
}

impl std::fmt::Display for DigestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestCategory::Clinical => write!(f, "clinical"),
            DigestCategory::Regulatory => write!(f, "regulatory"),
            DigestCategory::Research => write!(f, "research"),
            DigestCategory::Commercial => write!(f, "commercial"),
            DigestCategory::News => write!(f, "news"),
            DigestCategory::Other => write!(f, "other"),
        }
    }
}

impl DigestCategory {
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "clinical" | "trial" | "trials" => Self::Clinical,
            "regulatory" | "approval" => Self::Regulatory,
            "research" | "publication" | "science" => Self::Research,
            "commercial" | "business" | "deal" | "corporate" => Self::Commercial,
            "news" => Self::News,
            _ => Self::Other,
        }
    }
}

// --- Watch targets ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchTarget {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: TargetKind,
    /// Therapeutic or domain area (e.g. "oncology").
    pub area: Option<String>,
    /// Free-text monitoring notes; doubles as the target's monitoring goal.
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WatchTarget {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Lowercased name, display name and aliases, skipping blanks and repeats.
    pub fn match_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.name.as_str())
            .chain(self.display_name.as_deref())
            .chain(self.aliases.iter().map(String::as_str));
        for term in candidates {
            let t = term.trim().to_lowercase();
            if !t.is_empty() && !terms.contains(&t) {
                terms.push(t);
            }
        }
        terms
    }

    pub fn monitoring_goal(&self) -> &str {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MONITORING_GOAL)
    }
}

// --- Scan runs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRun {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub period: ScanPeriod,
    pub mode: ScanMode,
    pub status: RunStatus,
    pub target_ids: Vec<Uuid>,
    pub sources_total: u32,
    pub sources_completed: u32,
    pub sources_failed: u32,
    pub items_found: u32,
    pub new_items_found: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanRun {
    pub fn pending(
        user_id: Option<String>,
        period: ScanPeriod,
        mode: ScanMode,
        sources_total: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            period,
            mode,
            status: RunStatus::Pending,
            target_ids: Vec::new(),
            sources_total,
            sources_completed: 0,
            sources_failed: 0,
            items_found: 0,
            new_items_found: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Partial update applied to a [`ScanRun`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ScanRunPatch {
    pub status: Option<RunStatus>,
    pub target_ids: Option<Vec<Uuid>>,
    pub sources_completed: Option<u32>,
    pub sources_failed: Option<u32>,
    pub items_found: Option<u32>,
    pub new_items_found: Option<u32>,
    pub error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanRunPatch {
    pub fn apply(&self, run: &mut ScanRun) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(ids) = &self.target_ids {
            run.target_ids = ids.clone();
        }
        if let Some(n) = self.sources_completed {
            run.sources_completed = n;
        }
        if let Some(n) = self.sources_failed {
            run.sources_failed = n;
        }
        if let Some(n) = self.items_found {
            run.items_found = n;
        }
        if let Some(n) = self.new_items_found {
            run.new_items_found = n;
        }
        if let Some(e) = &self.error {
            run.error = Some(e.clone());
        }
        if let Some(t) = self.finished_at {
            run.finished_at = Some(t);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub source: String,
    pub state: SourceState,
    pub items_found: u32,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// --- Raw items ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub target_id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub abstract_text: Option<String>,
    pub full_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub is_new: bool,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl RawItem {
    /// Abstract, else full text, else nothing; blank strings count as missing.
    pub fn body(&self) -> Option<&str> {
        self.abstract_text
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.full_text.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

// --- Digests ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub source: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub id: Uuid,
    pub digest_run_id: Uuid,
    pub raw_item_ids: Vec<Uuid>,
    pub category: DigestCategory,
    pub significance: Significance,
    pub headline: String,
    pub synthesis: String,
    pub strategic_note: Option<String>,
    pub sources: Vec<SourceReference>,
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRun {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub period: ScanPeriod,
    pub fingerprint: String,
    pub executive_summary: Option<String>,
    pub critical_count: u32,
    pub high_count: u32,
    /// Medium and low significance entries; the report groups both as routine.
    pub low_count: u32,
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Per-bucket counts for a set of digest items.
pub fn significance_counts(items: &[DigestItem]) -> (u32, u32, u32) {
    items.iter().fold((0, 0, 0), |(c, h, l), item| match item.significance {
        Significance::Critical => (c + 1, h, l),
        Significance::High => (c, h + 1, l),
        Significance::Medium | Significance::Low => (c, h, l + 1),
    })
}

// --- Feedback ---

/// A user verdict on a previously surfaced raw item or digest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSignal {
    pub feedback: Feedback,
    pub title: String,
    pub source: Option<String>,
}

// --- Schedules ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: String,
    /// `None` for the user's global schedule, `Some` for a per-target one.
    pub target_id: Option<Uuid>,
    pub timezone: String,
    pub daily_enabled: bool,
    pub daily_hour: u32,
    pub daily_minute: u32,
    pub weekdays_only: bool,
    pub weekly_enabled: bool,
    /// 0 = Sunday.
    pub weekly_day_of_week: u32,
    pub weekly_hour: u32,
    pub weekly_minute: u32,
    pub last_daily_run_date: Option<String>,
    pub last_weekly_run_date: Option<String>,
}

/// Which last-trigger marker a schedule update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMarker {
    Daily,
    Weekly,
}
