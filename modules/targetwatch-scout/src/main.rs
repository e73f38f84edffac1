use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use targetwatch_common::{Config, ScanMode, ScanPeriod};
use targetwatch_scout::{ScanDeps, ScanOrchestrator, ScanRequest, ScanStore, ScheduleChecker};
use targetwatch_store::PgStore;

#[derive(Parser)]
#[command(name = "scout", about = "TargetWatch scan runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan and wait for it to finish
    Scan {
        #[arg(long, default_value = "daily")]
        period: ScanPeriod,
        #[arg(long, default_value = "latest")]
        mode: ScanMode,
        /// Target id; repeat for several. Defaults to all active targets.
        #[arg(long = "target")]
        targets: Vec<Uuid>,
        /// Source id; repeat for several. Defaults to all sources.
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Limit "all active targets" to one user
        #[arg(long)]
        user: Option<String>,
    },
    /// Check schedules once and start any scans that are due
    Tick,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("targetwatch=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::scout_from_env();
    config.log_redacted();

    let pg = PgStore::connect(&config.database_url).await?;
    pg.migrate().await?;
    let store: Arc<dyn ScanStore> = Arc::new(pg);

    let orchestrator = ScanOrchestrator::new(ScanDeps::from_config(store.clone(), &config)?);

    match cli.command {
        Command::Scan {
            period,
            mode,
            targets,
            sources,
            user,
        } => {
            let request = ScanRequest {
                period,
                target_ids: (!targets.is_empty()).then_some(targets),
                user_id: user,
                mode,
                sources: (!sources.is_empty()).then_some(sources),
                scan_run_id: None,
            };
            let outcome = orchestrator.run_with_deadline(request).await?;

            info!(
                scan_run_id = %outcome.scan_run_id,
                total_found = outcome.total_found,
                new_found = outcome.new_found,
                failed = outcome.failed_sources.len(),
                skipped = ?outcome.skipped_sources,
                digest = ?outcome.digest,
                "Scan finished"
            );
            for failed in &outcome.failed_sources {
                info!(source = %failed.source, error = %failed.error, "Source failed");
            }
        }
        Command::Tick => {
            let checker = ScheduleChecker::new(
                store,
                Arc::new(orchestrator.clone()),
                config.schedule_tolerance_minutes,
            );
            let report = checker.check_and_trigger(Utc::now()).await?;
            info!(
                checked = report.checked,
                triggered = report.triggered.len(),
                failed = report.failed.len(),
                "Tick finished"
            );

            // Triggered scans run in the background; wait for them before exiting.
            for triggered in &report.triggered {
                wait_for_run(orchestrator.deps().store.as_ref(), triggered.scan_run_id, &config)
                    .await?;
            }
        }
    }

    Ok(())
}

async fn wait_for_run(store: &dyn ScanStore, id: Uuid, config: &Config) -> Result<()> {
    let deadline = Instant::now() + config.scan_timeout() + Duration::from_secs(30);
    while Instant::now() < deadline {
        if let Some(run) = store.scan_run(id).await? {
            if run.status.is_terminal() {
                info!(scan_run_id = %id, status = %run.status, "Scheduled scan finished");
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    Ok(())
}
