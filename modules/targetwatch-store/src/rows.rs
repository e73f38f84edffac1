//! Row shapes as stored in Postgres and their conversions into domain types.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use targetwatch_common::{
    DigestCategory, DigestItem, DigestRun, Feedback, RawItem, RunStatus, ScanMode, ScanPeriod,
    ScanRun, Schedule, Significance, SourceReference, SourceState, SourceStatus, TargetKind,
    WatchTarget,
};

fn period(s: &str) -> ScanPeriod {
    s.parse().unwrap_or(ScanPeriod::Daily)
}

fn mode(s: &str) -> ScanMode {
    s.parse().unwrap_or_default()
}

fn count(n: i32) -> u32 {
    n.max(0) as u32
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TargetRow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub aliases: Vec<String>,
    pub kind: String,
    pub area: Option<String>,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<TargetRow> for WatchTarget {
    fn from(r: TargetRow) -> Self {
        WatchTarget {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            display_name: r.display_name,
            aliases: r.aliases,
            kind: TargetKind::from_str_loose(&r.kind),
            area: r.area,
            notes: r.notes,
            active: r.active,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ScanRunRow {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub period: String,
    pub mode: String,
    pub status: String,
    pub target_ids: Vec<Uuid>,
    pub sources_total: i32,
    pub sources_completed: i32,
    pub sources_failed: i32,
    pub items_found: i32,
    pub new_items_found: i32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<ScanRunRow> for ScanRun {
    fn from(r: ScanRunRow) -> Self {
        ScanRun {
            id: r.id,
            user_id: r.user_id,
            period: period(&r.period),
            mode: mode(&r.mode),
            status: RunStatus::from_str_loose(&r.status),
            target_ids: r.target_ids,
            sources_total: count(r.sources_total),
            sources_completed: count(r.sources_completed),
            sources_failed: count(r.sources_failed),
            items_found: count(r.items_found),
            new_items_found: count(r.new_items_found),
            error: r.error,
            started_at: r.started_at,
            finished_at: r.finished_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceStatusRow {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub source: String,
    pub state: String,
    pub items_found: i32,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<SourceStatusRow> for SourceStatus {
    fn from(r: SourceStatusRow) -> Self {
        SourceStatus {
            id: r.id,
            scan_run_id: r.scan_run_id,
            source: r.source,
            state: SourceState::from_str_loose(&r.state),
            items_found: count(r.items_found),
            error: r.error,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RawItemRow {
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
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RawItemRow> for RawItem {
    fn from(r: RawItemRow) -> Self {
        RawItem {
            id: r.id,
            scan_run_id: r.scan_run_id,
            target_id: r.target_id,
            source: r.source,
            external_id: r.external_id,
            title: r.title,
            url: r.url,
            abstract_text: r.abstract_text,
            full_text: r.full_text,
            published_at: r.published_at,
            metadata: r.metadata,
            is_new: r.is_new,
            feedback: r.feedback.as_deref().and_then(Feedback::parse),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DigestRunRow {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub period: String,
    pub fingerprint: String,
    pub executive_summary: Option<String>,
    pub critical_count: i32,
    pub high_count: i32,
    pub low_count: i32,
    pub item_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<DigestRunRow> for DigestRun {
    fn from(r: DigestRunRow) -> Self {
        DigestRun {
            id: r.id,
            scan_run_id: r.scan_run_id,
            period: period(&r.period),
            fingerprint: r.fingerprint,
            executive_summary: r.executive_summary,
            critical_count: count(r.critical_count),
            high_count: count(r.high_count),
            low_count: count(r.low_count),
            item_count: count(r.item_count),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DigestItemRow {
    pub id: Uuid,
    pub digest_run_id: Uuid,
    pub raw_item_ids: Vec<Uuid>,
    pub category: String,
    pub significance: String,
    pub headline: String,
    pub synthesis: String,
    pub strategic_note: Option<String>,
    pub sources: serde_json::Value,
    pub feedback: Option<String>,
}

impl TryFrom<DigestItemRow> for DigestItem {
    type Error = serde_json::Error;

    fn try_from(r: DigestItemRow) -> Result<Self, Self::Error> {
        let sources: Vec<SourceReference> = serde_json::from_value(r.sources)?;
        Ok(DigestItem {
            id: r.id,
            digest_run_id: r.digest_run_id,
            raw_item_ids: r.raw_item_ids,
            category: DigestCategory::from_str_loose(&r.category),
            significance: Significance::from_str_loose(&r.significance),
            headline: r.headline,
            synthesis: r.synthesis,
            strategic_note: r.strategic_note,
            sources,
            feedback: r.feedback.as_deref().and_then(Feedback::parse),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ScheduleRow {
    pub id: Uuid,
    pub user_id: String,
    pub target_id: Option<Uuid>,
    pub timezone: String,
    pub daily_enabled: bool,
    pub daily_hour: i32,
    pub daily_minute: i32,
    pub weekdays_only: bool,
    pub weekly_enabled: bool,
    pub weekly_day_of_week: i32,
    pub weekly_hour: i32,
    pub weekly_minute: i32,
    pub last_daily_run_date: Option<String>,
    pub last_weekly_run_date: Option<String>,
}

impl From<ScheduleRow> for Schedule {
    fn from(r: ScheduleRow) -> Self {
        Schedule {
            id: r.id,
            user_id: r.user_id,
            target_id: r.target_id,
            timezone: r.timezone,
            daily_enabled: r.daily_enabled,
            daily_hour: count(r.daily_hour),
            daily_minute: count(r.daily_minute),
            weekdays_only: r.weekdays_only,
            weekly_enabled: r.weekly_enabled,
            weekly_day_of_week: count(r.weekly_day_of_week),
            weekly_hour: count(r.weekly_hour),
            weekly_minute: count(r.weekly_minute),
            last_daily_run_date: r.last_daily_run_date,
            last_weekly_run_date: r.last_weekly_run_date,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedbackRow {
    pub feedback: String,
    pub title: String,
    pub source: Option<String>,
}
