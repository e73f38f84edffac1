use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use targetwatch_common::{ScanMode, ScanPeriod, Schedule, ScheduleMarker};

use crate::pipeline::orchestrator::{ScanOrchestrator, ScanRequest};
use crate::traits::ScanStore;

/// Starts a scan and returns its run id without waiting for it to finish.
#[async_trait]
pub trait ScanTrigger: Send + Sync {
    async fn trigger(&self, request: ScanRequest) -> Result<Uuid>;
}

#[async_trait]
impl ScanTrigger for ScanOrchestrator {
    async fn trigger(&self, request: ScanRequest) -> Result<Uuid> {
        let prepared = self.prepare(request).await?;
        let id = prepared.scan_run_id();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.finish_with_deadline(prepared).await {
                warn!(scan_run_id = %id, error = %e, "Scheduled scan failed");
            }
        });
        Ok(id)
    }
}

/// A schedule's wall clock at the moment of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSlot {
    /// Local date, `YYYY-MM-DD`.
    pub date_key: String,
    /// Monday of the local week, `YYYY-MM-DD`.
    pub week_key: String,
    /// 0 = Sunday.
    pub weekday: u32,
    /// Minutes since local midnight.
    pub minutes: i64,
}

impl LocalSlot {
    pub fn at(now: DateTime<Utc>, timezone: &str) -> Self {
        let tz: Tz = timezone.parse().unwrap_or_else(|_| {
            warn!(timezone, "Unknown time zone, using UTC");
            Tz::UTC
        });
        let local = now.with_timezone(&tz);
        let date = local.date_naive();
        let monday = date - Duration::days(local.weekday().num_days_from_monday() as i64);

        Self {
            date_key: date.format("%Y-%m-%d").to_string(),
            week_key: monday.format("%Y-%m-%d").to_string(),
            weekday: local.weekday().num_days_from_sunday(),
            minutes: (local.hour() * 60 + local.minute()) as i64,
        }
    }

    fn is_weekend(&self) -> bool {
        self.weekday == 0 || self.weekday == 6
    }

    fn near(&self, hour: u32, minute: u32, tolerance_minutes: i64) -> bool {
        let slot = (hour * 60 + minute) as i64;
        (self.minutes - slot).abs() < tolerance_minutes
    }
}

/// The periods due for `schedule` at `slot`, paired with the marker key to record.
pub fn due_periods(
    schedule: &Schedule,
    slot: &LocalSlot,
    tolerance_minutes: i64,
) -> Vec<(ScanPeriod, String)> {
    let mut due = Vec::new();

    if schedule.daily_enabled
        && slot.near(schedule.daily_hour, schedule.daily_minute, tolerance_minutes)
        && !(schedule.weekdays_only && slot.is_weekend())
        && schedule.last_daily_run_date.as_deref() != Some(slot.date_key.as_str())
    {
        due.push((ScanPeriod::Daily, slot.date_key.clone()));
    }

    if schedule.weekly_enabled
        && schedule.weekly_day_of_week == slot.weekday
        && slot.near(schedule.weekly_hour, schedule.weekly_minute, tolerance_minutes)
        && schedule.last_weekly_run_date.as_deref() != Some(slot.week_key.as_str())
    {
        due.push((ScanPeriod::Weekly, slot.week_key.clone()));
    }

    due
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredScan {
    pub schedule_id: Uuid,
    pub period: ScanPeriod,
    pub scan_run_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTrigger {
    pub schedule_id: Uuid,
    pub period: ScanPeriod,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub checked: usize,
    pub triggered: Vec<TriggeredScan>,
    pub failed: Vec<FailedTrigger>,
}

/// Fires scans for schedules whose daily or weekly slot has come round.
///
/// Each trigger is guarded by a persisted marker (local date for daily, the
/// week's Monday for weekly) claimed with compare-and-set before the scan
/// starts, so a slot fires at most once however many ticks land inside the
/// tolerance window.
pub struct ScheduleChecker {
    store: Arc<dyn ScanStore>,
    trigger: Arc<dyn ScanTrigger>,
    tolerance_minutes: i64,
}

impl ScheduleChecker {
    pub fn new(
        store: Arc<dyn ScanStore>,
        trigger: Arc<dyn ScanTrigger>,
        tolerance_minutes: i64,
    ) -> Self {
        Self {
            store,
            trigger,
            tolerance_minutes,
        }
    }

    pub async fn check_and_trigger(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let schedules = self.store.enabled_schedules().await?;
        let mut report = TickReport {
            checked: schedules.len(),
            ..Default::default()
        };

        for schedule in &schedules {
            let slot = LocalSlot::at(now, &schedule.timezone);
            for (period, key) in due_periods(schedule, &slot, self.tolerance_minutes) {
                if let Err(e) = self.fire(schedule, period, key, &mut report).await {
                    warn!(schedule_id = %schedule.id, %period, error = %e, "Could not claim schedule slot");
                    report.failed.push(FailedTrigger {
                        schedule_id: schedule.id,
                        period,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.triggered.is_empty() || !report.failed.is_empty() {
            info!(
                checked = report.checked,
                triggered = report.triggered.len(),
                failed = report.failed.len(),
                "Schedule tick"
            );
        }
        Ok(report)
    }

    /// Claim the slot and start the scan. Only a failed claim is returned as
    /// an error; trigger failures are recorded on `report`.
    async fn fire(
        &self,
        schedule: &Schedule,
        period: ScanPeriod,
        key: String,
        report: &mut TickReport,
    ) -> Result<()> {
        let (marker, previous) = match period {
            ScanPeriod::Daily => (ScheduleMarker::Daily, schedule.last_daily_run_date.as_deref()),
            ScanPeriod::Weekly => (ScheduleMarker::Weekly, schedule.last_weekly_run_date.as_deref()),
        };

        let claimed = self
            .store
            .swap_schedule_marker(schedule.id, marker, previous, Some(&key))
            .await?;
        if !claimed {
            info!(schedule_id = %schedule.id, %period, "Slot already claimed elsewhere");
            return Ok(());
        }

        let request = ScanRequest {
            period,
            target_ids: schedule.target_id.map(|id| vec![id]),
            user_id: Some(schedule.user_id.clone()),
            mode: ScanMode::Latest,
            sources: None,
            scan_run_id: None,
        };

        match self.trigger.trigger(request).await {
            Ok(scan_run_id) => {
                info!(schedule_id = %schedule.id, %period, %scan_run_id, "Scheduled scan started");
                report.triggered.push(TriggeredScan {
                    schedule_id: schedule.id,
                    period,
                    scan_run_id,
                });
            }
            Err(e) => {
                warn!(schedule_id = %schedule.id, %period, error = %e, "Trigger failed, releasing slot");
                let mut error = e.to_string();
                if let Err(release) = self
                    .store
                    .swap_schedule_marker(schedule.id, marker, Some(&key), previous)
                    .await
                {
                    warn!(schedule_id = %schedule.id, %period, error = %release, "Could not release slot");
                    error = format!("{error}; slot not released: {release}");
                }
                report.failed.push(FailedTrigger {
                    schedule_id: schedule.id,
                    period,
                    error,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{daily_schedule, MemoryStore, RecordingTrigger};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn checker(store: &Arc<MemoryStore>, trigger: &Arc<RecordingTrigger>) -> ScheduleChecker {
        ScheduleChecker::new(store.clone(), trigger.clone(), 20)
    }

    #[tokio::test]
    async fn daily_slot_fires_once_per_day() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        store.add_schedule(daily_schedule("u1", "UTC", 9, 0));

        let first = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 5))
            .await
            .unwrap();
        assert_eq!(first.triggered.len(), 1);
        assert_eq!(
            store.schedules()[0].last_daily_run_date.as_deref(),
            Some("2026-10-14")
        );

        let second = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 15))
            .await
            .unwrap();
        assert!(second.triggered.is_empty());
        assert_eq!(trigger.requests().len(), 1);

        let request = &trigger.requests()[0];
        assert_eq!(request.period, ScanPeriod::Daily);
        assert_eq!(request.user_id.as_deref(), Some("u1"));
        assert!(request.target_ids.is_none());
    }

    #[tokio::test]
    async fn outside_tolerance_does_not_fire() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        store.add_schedule(daily_schedule("u1", "UTC", 9, 0));

        let report = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 20))
            .await
            .unwrap();
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn weekdays_only_skips_saturday() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        let mut schedule = daily_schedule("u1", "UTC", 9, 0);
        schedule.weekdays_only = true;
        store.add_schedule(schedule);

        let report = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 17, 9, 0))
            .await
            .unwrap();
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn local_time_zone_is_honoured() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        store.add_schedule(daily_schedule("u1", "America/New_York", 9, 0));

        // 09:00 EDT is 13:00 UTC.
        let early = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 0))
            .await
            .unwrap();
        assert!(early.triggered.is_empty());

        let on_time = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 13, 2))
            .await
            .unwrap();
        assert_eq!(on_time.triggered.len(), 1);
    }

    #[tokio::test]
    async fn weekly_marker_is_the_monday_of_the_week() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        let mut schedule = daily_schedule("u1", "UTC", 9, 0);
        schedule.daily_enabled = false;
        schedule.weekly_enabled = true;
        schedule.weekly_day_of_week = 3;
        schedule.target_id = Some(Uuid::new_v4());
        store.add_schedule(schedule.clone());

        let report = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 10))
            .await
            .unwrap();
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].period, ScanPeriod::Weekly);
        assert_eq!(
            store.schedules()[0].last_weekly_run_date.as_deref(),
            Some("2026-10-12")
        );
        assert_eq!(
            trigger.requests()[0].target_ids,
            Some(vec![schedule.target_id.unwrap()])
        );
    }

    #[tokio::test]
    async fn failed_trigger_releases_the_slot() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::failing());
        store.add_schedule(daily_schedule("u1", "UTC", 9, 0));

        let report = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 5))
            .await
            .unwrap();
        assert!(report.triggered.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(store.schedules()[0].last_daily_run_date.is_none());
    }

    #[tokio::test]
    async fn store_failure_on_one_schedule_does_not_stop_the_tick() {
        let store = Arc::new(MemoryStore::new());
        let trigger = Arc::new(RecordingTrigger::new());
        let broken = daily_schedule("u1", "UTC", 9, 0);
        let healthy = daily_schedule("u2", "UTC", 9, 0);
        store.add_schedule(broken.clone());
        store.add_schedule(healthy.clone());
        store.fail_marker_writes_for(broken.id);

        let report = checker(&store, &trigger)
            .check_and_trigger(at(2026, 10, 14, 9, 5))
            .await
            .unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].schedule_id, broken.id);
        assert!(report.failed[0].error.contains("unavailable"));
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].schedule_id, healthy.id);
        assert_eq!(trigger.requests().len(), 1);
        assert_eq!(trigger.requests()[0].user_id.as_deref(), Some("u2"));
    }

    #[test]
    fn unknown_time_zone_falls_back_to_utc() {
        let now = at(2026, 10, 14, 23, 30);
        assert_eq!(LocalSlot::at(now, "Mars/Olympus"), LocalSlot::at(now, "UTC"));
    }

    #[test]
    fn local_slot_fields() {
        let slot = LocalSlot::at(at(2026, 10, 18, 7, 45), "UTC");
        assert_eq!(slot.weekday, 0);
        assert_eq!(slot.date_key, "2026-10-18");
        assert_eq!(slot.week_key, "2026-10-12");
        assert_eq!(slot.minutes, 465);
    }
}
