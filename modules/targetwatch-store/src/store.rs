//! Postgres persistence for watch targets, scan runs, raw items, digests and schedules.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use targetwatch_common::{
    DigestItem, DigestRun, Feedback, FeedbackSignal, RawItem, ScanRun, ScanRunPatch, Schedule,
    ScheduleMarker, SourceState, SourceStatus, WatchTarget,
};

use crate::error::Result;
use crate::rows::*;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    // --- Watch targets ---

    pub async fn insert_target(&self, t: &WatchTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watch_targets
                (id, user_id, name, display_name, aliases, kind, area, notes, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                display_name = EXCLUDED.display_name,
                aliases = EXCLUDED.aliases,
                kind = EXCLUDED.kind,
                area = EXCLUDED.area,
                notes = EXCLUDED.notes,
                active = EXCLUDED.active
            "#,
        )
        .bind(t.id)
        .bind(&t.user_id)
        .bind(&t.name)
        .bind(&t.display_name)
        .bind(&t.aliases)
        .bind(t.kind.to_string())
        .bind(&t.area)
        .bind(&t.notes)
        .bind(t.active)
        .bind(t.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Targets with the given ids, in creation order. Unknown ids are ignored.
    pub async fn targets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<WatchTarget>> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT * FROM watch_targets
            WHERE id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WatchTarget::from).collect())
    }

    /// Active targets, optionally restricted to one user.
    pub async fn active_targets(&self, user_id: Option<&str>) -> Result<Vec<WatchTarget>> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT * FROM watch_targets
            WHERE active AND ($1::text IS NULL OR user_id = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WatchTarget::from).collect())
    }

    // --- Scan runs ---

    pub async fn insert_scan_run(&self, run: &ScanRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_runs
                (id, user_id, period, mode, status, target_ids, sources_total,
                 sources_completed, sources_failed, items_found, new_items_found,
                 error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(run.id)
        .bind(&run.user_id)
        .bind(run.period.to_string())
        .bind(run.mode.to_string())
        .bind(run.status.to_string())
        .bind(&run.target_ids)
        .bind(run.sources_total as i32)
        .bind(run.sources_completed as i32)
        .bind(run.sources_failed as i32)
        .bind(run.items_found as i32)
        .bind(run.new_items_found as i32)
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn scan_run(&self, id: Uuid) -> Result<Option<ScanRun>> {
        let row = sqlx::query_as::<_, ScanRunRow>("SELECT * FROM scan_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScanRun::from))
    }

    pub async fn patch_scan_run(&self, id: Uuid, patch: &ScanRunPatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_runs SET
                status            = COALESCE($2, status),
                target_ids        = COALESCE($3, target_ids),
                sources_completed = COALESCE($4, sources_completed),
                sources_failed    = COALESCE($5, sources_failed),
                items_found       = COALESCE($6, items_found),
                new_items_found   = COALESCE($7, new_items_found),
                error             = COALESCE($8, error),
                finished_at       = COALESCE($9, finished_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.target_ids.as_deref())
        .bind(patch.sources_completed.map(|n| n as i32))
        .bind(patch.sources_failed.map(|n| n as i32))
        .bind(patch.items_found.map(|n| n as i32))
        .bind(patch.new_items_found.map(|n| n as i32))
        .bind(&patch.error)
        .bind(patch.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Source statuses ---

    /// Insert or overwrite the status row for `(scan_run_id, source)`.
    pub async fn upsert_source_status(
        &self,
        scan_run_id: Uuid,
        source: &str,
        state: SourceState,
        items_found: u32,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_statuses (id, scan_run_id, source, state, items_found, error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (scan_run_id, source) DO UPDATE SET
                state = EXCLUDED.state,
                items_found = EXCLUDED.items_found,
                error = EXCLUDED.error,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scan_run_id)
        .bind(source)
        .bind(state.to_string())
        .bind(items_found as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn source_statuses(&self, scan_run_id: Uuid) -> Result<Vec<SourceStatus>> {
        let rows = sqlx::query_as::<_, SourceStatusRow>(
            "SELECT * FROM source_statuses WHERE scan_run_id = $1 ORDER BY source",
        )
        .bind(scan_run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SourceStatus::from).collect())
    }

    // --- Raw items ---

    /// Already-stored external ids for each of `sources`.
    pub async fn existing_external_ids(
        &self,
        sources: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT source, external_id FROM raw_items WHERE source = ANY($1)",
        )
        .bind(sources)
        .fetch_all(&self.pool)
        .await?;

        let mut by_source: HashMap<String, HashSet<String>> = HashMap::new();
        for (source, external_id) in rows {
            by_source.entry(source).or_default().insert(external_id);
        }
        Ok(by_source)
    }

    pub async fn find_raw_item(&self, source: &str, external_id: &str) -> Result<Option<RawItem>> {
        let row = sqlx::query_as::<_, RawItemRow>(
            "SELECT * FROM raw_items WHERE source = $1 AND external_id = $2",
        )
        .bind(source)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RawItem::from))
    }

    /// Insert a raw item. Returns `false` when `(source, external_id)` already exists.
    pub async fn insert_raw_item(&self, item: &RawItem) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO raw_items
                (id, scan_run_id, target_id, source, external_id, title, url,
                 abstract_text, full_text, published_at, metadata, is_new, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (source, external_id) DO NOTHING
            "#,
        )
        .bind(item.id)
        .bind(item.scan_run_id)
        .bind(item.target_id)
        .bind(&item.source)
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.abstract_text)
        .bind(&item.full_text)
        .bind(item.published_at)
        .bind(&item.metadata)
        .bind(item.is_new)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            debug!(source = %item.source, external_id = %item.external_id, "Raw item already stored");
        }
        Ok(inserted)
    }

    /// Most recent user verdicts on raw items and digest entries, newest first.
    pub async fn recent_feedback(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<FeedbackSignal>> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT feedback, title, source FROM (
                SELECT r.feedback, r.title, r.source, r.feedback_at AS at
                FROM raw_items r
                JOIN watch_targets t ON t.id = r.target_id
                WHERE r.feedback IS NOT NULL
                  AND ($1::text IS NULL OR t.user_id = $1)
                UNION ALL
                SELECT d.feedback, d.headline AS title, NULL AS source, d.feedback_at AS at
                FROM digest_items d
                JOIN digest_runs dr ON dr.id = d.digest_run_id
                JOIN scan_runs s ON s.id = dr.scan_run_id
                WHERE d.feedback IS NOT NULL
                  AND ($1::text IS NULL OR s.user_id = $1)
            ) f
            ORDER BY at DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Feedback::parse(&r.feedback).map(|feedback| FeedbackSignal {
                    feedback,
                    title: r.title,
                    source: r.source,
                })
            })
            .collect())
    }

    // --- Digests ---

    pub async fn digest_run_by_fingerprint(&self, fingerprint: &str) -> Result<Option<DigestRun>> {
        let row = sqlx::query_as::<_, DigestRunRow>(
            "SELECT * FROM digest_runs WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DigestRun::from))
    }

    /// Persist a digest run and its items atomically.
    ///
    /// Returns `false` without writing anything when a run with the same
    /// fingerprint already exists.
    pub async fn insert_digest(&self, run: &DigestRun, items: &[DigestItem]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO digest_runs
                (id, scan_run_id, period, fingerprint, executive_summary,
                 critical_count, high_count, low_count, item_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(run.scan_run_id)
        .bind(run.period.to_string())
        .bind(&run.fingerprint)
        .bind(&run.executive_summary)
        .bind(run.critical_count as i32)
        .bind(run.high_count as i32)
        .bind(run.low_count as i32)
        .bind(run.item_count as i32)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO digest_items
                    (id, digest_run_id, position, raw_item_ids, category, significance,
                     headline, synthesis, strategic_note, sources)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(item.id)
            .bind(run.id)
            .bind(position as i32)
            .bind(&item.raw_item_ids)
            .bind(item.category.to_string())
            .bind(item.significance.to_string())
            .bind(&item.headline)
            .bind(&item.synthesis)
            .bind(&item.strategic_note)
            .bind(serde_json::to_value(&item.sources)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn digest_items(&self, digest_run_id: Uuid) -> Result<Vec<DigestItem>> {
        let rows = sqlx::query_as::<_, DigestItemRow>(
            r#"
            SELECT id, digest_run_id, raw_item_ids, category, significance, headline,
                   synthesis, strategic_note, sources, feedback
            FROM digest_items
            WHERE digest_run_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(digest_run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(DigestItem::try_from(row)?);
        }
        Ok(items)
    }

    // --- Schedules ---

    pub async fn upsert_schedule(&self, s: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules
                (id, user_id, target_id, timezone, daily_enabled, daily_hour, daily_minute,
                 weekdays_only, weekly_enabled, weekly_day_of_week, weekly_hour, weekly_minute,
                 last_daily_run_date, last_weekly_run_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                timezone = EXCLUDED.timezone,
                daily_enabled = EXCLUDED.daily_enabled,
                daily_hour = EXCLUDED.daily_hour,
                daily_minute = EXCLUDED.daily_minute,
                weekdays_only = EXCLUDED.weekdays_only,
                weekly_enabled = EXCLUDED.weekly_enabled,
                weekly_day_of_week = EXCLUDED.weekly_day_of_week,
                weekly_hour = EXCLUDED.weekly_hour,
                weekly_minute = EXCLUDED.weekly_minute
            "#,
        )
        .bind(s.id)
        .bind(&s.user_id)
        .bind(s.target_id)
        .bind(&s.timezone)
        .bind(s.daily_enabled)
        .bind(s.daily_hour as i32)
        .bind(s.daily_minute as i32)
        .bind(s.weekdays_only)
        .bind(s.weekly_enabled)
        .bind(s.weekly_day_of_week as i32)
        .bind(s.weekly_hour as i32)
        .bind(s.weekly_minute as i32)
        .bind(&s.last_daily_run_date)
        .bind(&s.last_weekly_run_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Schedules with at least one cadence enabled.
    pub async fn enabled_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE daily_enabled OR weekly_enabled ORDER BY user_id, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    /// Compare-and-set a schedule's last-trigger marker.
    ///
    /// Writes `value` only if the stored marker still equals `expected`
    /// (NULL-safe). Returns whether the write happened.
    pub async fn swap_schedule_marker(
        &self,
        schedule_id: Uuid,
        marker: ScheduleMarker,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        let sql = match marker {
            ScheduleMarker::Daily => {
                r#"
                UPDATE schedules SET last_daily_run_date = $3
                WHERE id = $1 AND last_daily_run_date IS NOT DISTINCT FROM $2
                "#
            }
            ScheduleMarker::Weekly => {
                r#"
                UPDATE schedules SET last_weekly_run_date = $3
                WHERE id = $1 AND last_weekly_run_date IS NOT DISTINCT FROM $2
                "#
            }
        };
        let swapped = sqlx::query(sql)
            .bind(schedule_id)
            .bind(expected)
            .bind(value)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;
        Ok(swapped)
    }

    /// Mark a scan run failed if it has not reached a terminal state.
    pub async fn fail_scan_run_if_open(&self, id: Uuid, error: &str) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_runs SET status = 'failed', error = $2, finished_at = $3
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        Ok(updated)
    }
}
