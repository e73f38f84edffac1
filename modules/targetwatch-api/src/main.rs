use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use targetwatch_common::Config;
use targetwatch_scout::{ScanDeps, ScanOrchestrator, ScanStore, ScheduleChecker};
use targetwatch_store::PgStore;

mod auth;
mod error;
mod rest;

pub struct AppState {
    pub orchestrator: ScanOrchestrator,
    pub checker: ScheduleChecker,
    pub scan_secret: String,
    pub public_origin: Option<String>,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        .route("/scan", post(rest::scan::api_scan))
        .route("/schedules/tick", post(rest::schedules::api_tick))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

/// Run the schedule check every `interval` for the life of the process.
fn start_tick_loop(state: Arc<AppState>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting schedule tick loop");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = state.checker.check_and_trigger(Utc::now()).await {
                warn!(error = %e, "Schedule tick failed");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("targetwatch=info".parse()?))
        .init();

    let config = Config::api_from_env();
    config.log_redacted();

    let pg = PgStore::connect(&config.database_url).await?;
    pg.migrate().await?;
    let store: Arc<dyn ScanStore> = Arc::new(pg);

    let orchestrator = ScanOrchestrator::new(ScanDeps::from_config(store.clone(), &config)?);
    let checker = ScheduleChecker::new(
        store,
        Arc::new(orchestrator.clone()),
        config.schedule_tolerance_minutes,
    );

    let state = Arc::new(AppState {
        orchestrator,
        checker,
        scan_secret: config.scan_secret.clone(),
        public_origin: config.public_origin.clone(),
    });

    if config.scheduler_interval_minutes > 0 {
        start_tick_loop(
            state.clone(),
            Duration::from_secs(config.scheduler_interval_minutes * 60),
        );
    }

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("TargetWatch API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod test_support {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    use targetwatch_scout::digest::DeterministicStrategy;
    use targetwatch_scout::testing::{MemoryStore, MockSource};
    use targetwatch_scout::{
        DigestSynthesizer, ScanDeps, ScanOrchestrator, ScanStore, ScheduleChecker, SourceRegistry,
    };

    use crate::AppState;

    /// Router over a MemoryStore with the given sources, secret "s3cret" and
    /// public origin "https://watch.example.com".
    pub fn app(sources: Vec<MockSource>) -> (Router, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn ScanStore> = memory.clone();

        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(Arc::new(source));
        }

        let orchestrator = ScanOrchestrator::new(
            ScanDeps::builder()
                .store(store.clone())
                .registry(Arc::new(registry))
                .digest(Arc::new(DigestSynthesizer::new(
                    store.clone(),
                    Arc::new(DeterministicStrategy),
                )))
                .build(),
        );
        let checker = ScheduleChecker::new(store, Arc::new(orchestrator.clone()), 20);

        let state = Arc::new(AppState {
            orchestrator,
            checker,
            scan_secret: "s3cret".into(),
            public_origin: Some("https://watch.example.com".into()),
        });
        (crate::router(state), memory)
    }

    pub async fn post_json(
        router: Router,
        path: &str,
        headers: &[(&str, &str)],
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::post(path).header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_check_is_open() {
        let (router, _) = app(Vec::new());
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
