//! One scan run end to end.
//!
//! `prepare` validates the request and creates the ScanRun; `execute` fans the
//! selected adapters out concurrently and then runs filter, enrichment and
//! ingest per source, finishing with the digest. Validation failures happen
//! before anything is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use ai_client::Claude;
use targetwatch_common::{
    Config, RunStatus, ScanMode, ScanPeriod, ScanRun, ScanRunPatch, SourceState, TargetWatchError,
    WatchTarget,
};

use crate::digest::{
    DeterministicStrategy, DigestOutcome, DigestStrategy, DigestSynthesizer, GenerativeStrategy,
};
use crate::enrichment::{
    enrich_summaries, filter_relevant, ClaudeClassifier, ClaudeSummarizer, RelevanceClassifier,
    Summarizer,
};
use crate::pipeline::ingest::{ingest, IngestReport};
use crate::pipeline::mission::{build_mission, FEEDBACK_LIMIT};
use crate::sources::{SourceAdapter, SourceContext, SourceOutput, SourceRegistry};
use crate::traits::ScanStore;

/// Long-lived dependencies shared by every scan.
#[derive(Clone, TypedBuilder)]
pub struct ScanDeps {
    pub store: Arc<dyn ScanStore>,
    pub registry: Arc<SourceRegistry>,
    #[builder(default)]
    pub classifier: Option<Arc<dyn RelevanceClassifier>>,
    #[builder(default)]
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub digest: Arc<DigestSynthesizer>,
    #[builder(default = Duration::from_secs(600))]
    pub scan_timeout: Duration,
}

impl ScanDeps {
    /// Production wiring. Model-backed stages are only enabled with an Anthropic key.
    pub fn from_config(store: Arc<dyn ScanStore>, config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("targetwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let claude = (!config.anthropic_api_key.is_empty()).then(|| {
            Claude::new(&config.anthropic_api_key, &config.anthropic_model)
                .with_timeout(config.http_timeout() * 3)
        });

        let strategy: Arc<dyn DigestStrategy> = match &claude {
            Some(c) => Arc::new(GenerativeStrategy::new(c.clone())),
            None => Arc::new(DeterministicStrategy),
        };

        Ok(Self::builder()
            .store(store.clone())
            .registry(Arc::new(SourceRegistry::from_config(config, http)))
            .classifier(
                claude
                    .clone()
                    .map(|c| Arc::new(ClaudeClassifier::new(c)) as Arc<dyn RelevanceClassifier>),
            )
            .summarizer(
                claude.map(|c| Arc::new(ClaudeSummarizer::new(c)) as Arc<dyn Summarizer>),
            )
            .digest(Arc::new(DigestSynthesizer::new(store, strategy)))
            .scan_timeout(config.scan_timeout())
            .build())
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub period: ScanPeriod,
    /// Explicit targets; `None` scans every active target (of `user_id`, if set).
    pub target_ids: Option<Vec<Uuid>>,
    pub user_id: Option<String>,
    pub mode: ScanMode,
    /// Source ids to run; `None` runs all registered sources.
    pub sources: Option<Vec<String>>,
    /// Continue a ScanRun created elsewhere instead of creating one.
    pub scan_run_id: Option<Uuid>,
}

impl ScanRequest {
    pub fn new(period: ScanPeriod) -> Self {
        Self {
            period,
            target_ids: None,
            user_id: None,
            mode: ScanMode::default(),
            sources: None,
            scan_run_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSource {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub scan_run_id: Uuid,
    pub total_found: u32,
    pub new_found: u32,
    pub failed_sources: Vec<FailedSource>,
    pub skipped_sources: Vec<String>,
    pub digest: Option<DigestOutcome>,
}

impl ScanOutcome {
    fn empty(scan_run_id: Uuid) -> Self {
        Self {
            scan_run_id,
            total_found: 0,
            new_found: 0,
            failed_sources: Vec::new(),
            skipped_sources: Vec::new(),
            digest: None,
        }
    }
}

/// A validated request with its ScanRun already persisted.
pub struct PreparedScan {
    run: ScanRun,
    request: ScanRequest,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl PreparedScan {
    pub fn scan_run_id(&self) -> Uuid {
        self.run.id
    }
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    deps: Arc<ScanDeps>,
}

impl ScanOrchestrator {
    pub fn new(deps: ScanDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    pub fn deps(&self) -> &ScanDeps {
        &self.deps
    }

    pub async fn run(&self, request: ScanRequest) -> Result<ScanOutcome, TargetWatchError> {
        let prepared = self.prepare(request).await?;
        self.finish(prepared).await
    }

    /// Like [`run`](Self::run), bounded by the configured scan timeout.
    ///
    /// A run that overshoots is marked failed with `"stalled"`.
    pub async fn run_with_deadline(
        &self,
        request: ScanRequest,
    ) -> Result<ScanOutcome, TargetWatchError> {
        let prepared = self.prepare(request).await?;
        self.finish_with_deadline(prepared).await
    }

    pub async fn finish_with_deadline(
        &self,
        prepared: PreparedScan,
    ) -> Result<ScanOutcome, TargetWatchError> {
        let id = prepared.scan_run_id();
        match tokio::time::timeout(self.deps.scan_timeout, self.finish(prepared)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(scan_run_id = %id, timeout = ?self.deps.scan_timeout, "Scan exceeded its deadline");
                if let Err(e) = self.deps.store.fail_scan_run_if_open(id, "stalled").await {
                    error!(scan_run_id = %id, error = %e, "Failed to mark stalled scan");
                }
                Err(TargetWatchError::Stalled)
            }
        }
    }

    /// Validate, then create (or resume) the ScanRun with a pending status per source.
    pub async fn prepare(&self, request: ScanRequest) -> Result<PreparedScan, TargetWatchError> {
        let adapters = self.deps.registry.select(request.sources.as_deref())?;
        if adapters.is_empty() {
            return Err(TargetWatchError::Validation("no sources selected".into()));
        }
        let store = &self.deps.store;

        let run = match request.scan_run_id {
            Some(id) => {
                let run = store.scan_run(id).await?.ok_or_else(|| {
                    TargetWatchError::Validation(format!("scan run {id} not found"))
                })?;
                if run.status.is_terminal() {
                    return Err(TargetWatchError::Validation(format!(
                        "scan run {id} is already {}",
                        run.status
                    )));
                }
                run
            }
            None => {
                let run = ScanRun::pending(
                    request.user_id.clone(),
                    request.period,
                    request.mode,
                    adapters.len() as u32,
                );
                store.insert_scan_run(&run).await?;
                run
            }
        };

        for adapter in &adapters {
            store
                .set_source_status(run.id, adapter.id(), SourceState::Pending, 0, None)
                .await?;
        }

        Ok(PreparedScan {
            run,
            request,
            adapters,
        })
    }

    /// Run a prepared scan; a store failure part-way marks the run failed.
    pub async fn finish(&self, prepared: PreparedScan) -> Result<ScanOutcome, TargetWatchError> {
        let id = prepared.scan_run_id();
        match self.execute(prepared).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(scan_run_id = %id, error = %e, "Scan failed");
                if let Err(mark) = self.deps.store.fail_scan_run_if_open(id, &e.to_string()).await {
                    error!(scan_run_id = %id, error = %mark, "Failed to mark scan failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, prepared: PreparedScan) -> Result<ScanOutcome, TargetWatchError> {
        let PreparedScan {
            mut run,
            request,
            adapters,
        } = prepared;
        let store = &self.deps.store;

        let targets = match &request.target_ids {
            Some(ids) => store.targets_by_ids(ids).await?,
            None => store.active_targets(request.user_id.as_deref()).await?,
        };

        let started = ScanRunPatch {
            status: Some(RunStatus::Running),
            target_ids: Some(targets.iter().map(|t| t.id).collect()),
            ..Default::default()
        };
        store.patch_scan_run(run.id, &started).await?;
        started.apply(&mut run);

        info!(
            scan_run_id = %run.id,
            period = %run.period,
            mode = %run.mode,
            targets = targets.len(),
            sources = adapters.len(),
            "Scan started"
        );

        if targets.is_empty() {
            info!(scan_run_id = %run.id, "No targets to scan");
            for adapter in &adapters {
                store
                    .set_source_status(run.id, adapter.id(), SourceState::Skipped, 0, None)
                    .await?;
            }
            let done = ScanRunPatch {
                status: Some(RunStatus::Completed),
                sources_completed: Some(0),
                sources_failed: Some(0),
                items_found: Some(0),
                new_items_found: Some(0),
                finished_at: Some(Utc::now()),
                ..Default::default()
            };
            store.patch_scan_run(run.id, &done).await?;
            let mut outcome = ScanOutcome::empty(run.id);
            outcome.skipped_sources = adapters.iter().map(|a| a.id().to_string()).collect();
            return Ok(outcome);
        }

        let feedback = match store
            .recent_feedback(request.user_id.as_deref(), FEEDBACK_LIMIT)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Could not load feedback, continuing without it");
                Vec::new()
            }
        };
        let mission = build_mission(run.mode, &targets, &feedback);

        let source_ids: Vec<String> = adapters.iter().map(|a| a.id().to_string()).collect();
        let mut known = store.existing_external_ids(&source_ids).await?;

        let mut outcome = ScanOutcome::empty(run.id);
        let mut runnable = Vec::new();
        for adapter in adapters {
            if adapter.is_configured() {
                store
                    .set_source_status(run.id, adapter.id(), SourceState::Running, 0, None)
                    .await?;
                let ctx = SourceContext {
                    mission: mission.clone(),
                    targets: targets.clone(),
                    mode: run.mode,
                    existing_external_ids: known.remove(adapter.id()).unwrap_or_default(),
                };
                runnable.push((adapter, ctx));
            } else {
                info!(source = adapter.id(), "Source not configured, skipping");
                store
                    .set_source_status(run.id, adapter.id(), SourceState::Skipped, 0, None)
                    .await?;
                outcome.skipped_sources.push(adapter.id().to_string());
            }
        }

        let outputs = join_all(runnable.iter().map(|(adapter, ctx)| async move {
            let output = adapter.run(ctx).await;
            (adapter.id(), output)
        }))
        .await;

        let mut inserted = Vec::new();
        let mut completed = 0u32;
        for (source, output) in outputs {
            let source_error = output.error.clone();
            let processed = self.process_source(run.id, source, output, &targets).await;

            let (report, failure) = match processed {
                Ok(report) => (report, source_error),
                Err(e) => {
                    warn!(source, error = %e, "Post-processing failed");
                    (IngestReport::default(), Some(e.to_string()))
                }
            };

            match &failure {
                Some(err) => {
                    warn!(source, error = %err, items = report.new, "Source failed");
                    store
                        .set_source_status(
                            run.id,
                            source,
                            SourceState::Failed,
                            report.found,
                            Some(err.as_str()),
                        )
                        .await?;
                    outcome.failed_sources.push(FailedSource {
                        source: source.to_string(),
                        error: err.clone(),
                    });
                }
                None => {
                    info!(source, found = report.found, new = report.new, "Source completed");
                    store
                        .set_source_status(
                            run.id,
                            source,
                            SourceState::Completed,
                            report.found,
                            None,
                        )
                        .await?;
                    completed += 1;
                }
            }

            outcome.total_found += report.found;
            outcome.new_found += report.new;
            inserted.extend(report.inserted);
        }

        let done = ScanRunPatch {
            status: Some(RunStatus::Completed),
            sources_completed: Some(completed),
            sources_failed: Some(outcome.failed_sources.len() as u32),
            items_found: Some(outcome.total_found),
            new_items_found: Some(outcome.new_found),
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        store.patch_scan_run(run.id, &done).await?;
        done.apply(&mut run);

        info!(
            scan_run_id = %run.id,
            found = outcome.total_found,
            new = outcome.new_found,
            failed = outcome.failed_sources.len(),
            skipped = outcome.skipped_sources.len(),
            "Scan completed"
        );

        if outcome.new_found > 0 || run.period == ScanPeriod::Weekly {
            match self.deps.digest.synthesize(&run, &inserted, &targets).await {
                Ok(digest) => outcome.digest = Some(digest),
                Err(e) => error!(scan_run_id = %run.id, error = %e, "Digest synthesis failed"),
            }
        }

        Ok(outcome)
    }

    /// Relevance filter, then summary enrichment, then dedup ingest.
    async fn process_source(
        &self,
        scan_run_id: Uuid,
        source: &str,
        output: SourceOutput,
        targets: &[WatchTarget],
    ) -> anyhow::Result<IngestReport> {
        let returned = output.items.len();
        let mut items =
            filter_relevant(self.deps.classifier.as_deref(), output.items, targets).await;
        if items.len() < returned {
            info!(source, returned, kept = items.len(), "Relevance filter applied");
        }

        enrich_summaries(self.deps.summarizer.as_deref(), &mut items).await;

        ingest(self.deps.store.as_ref(), scan_run_id, source, items).await
    }
}
