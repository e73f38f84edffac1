use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use targetwatch_common::{ScanMode, ScanPeriod, TargetWatchError};
use targetwatch_scout::pipeline::orchestrator::FailedSource;
use targetwatch_scout::ScanRequest;

use crate::auth::ScanCaller;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    period: String,
    target_ids: Option<Vec<String>>,
    mode: Option<String>,
    sources: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    ok: bool,
    scan_run_id: Uuid,
    total_found: u32,
    new_found: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_sources: Option<Vec<FailedSource>>,
}

impl ScanBody {
    fn into_request(self) -> Result<ScanRequest, TargetWatchError> {
        let period: ScanPeriod = self.period.parse()?;
        let mode: ScanMode = match self.mode.as_deref() {
            Some(m) => m.parse()?,
            None => ScanMode::default(),
        };
        let target_ids = self
            .target_ids
            .map(|ids| {
                ids.iter()
                    .map(|id| {
                        Uuid::parse_str(id).map_err(|_| {
                            TargetWatchError::Validation(format!("invalid target id {id:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(ScanRequest {
            period,
            target_ids,
            user_id: None,
            mode,
            sources: self.sources,
            scan_run_id: None,
        })
    }
}

/// `POST /scan`: run one scan to completion (bounded by the scan timeout).
pub async fn api_scan(
    State(state): State<Arc<AppState>>,
    _caller: ScanCaller,
    body: Result<Json<ScanBody>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Json(body) =
        body.map_err(|e| TargetWatchError::Validation(format!("invalid request body: {e}")))?;
    let request = body.into_request()?;

    info!(period = %request.period, mode = %request.mode, "Scan requested");
    let outcome = state.orchestrator.run_with_deadline(request).await?;

    Ok(Json(ScanResponse {
        ok: true,
        scan_run_id: outcome.scan_run_id,
        total_found: outcome.total_found,
        new_found: outcome.new_found,
        failed_sources: (!outcome.failed_sources.is_empty()).then_some(outcome.failed_sources),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app, post_json};
    use axum::http::StatusCode;
    use serde_json::json;
    use targetwatch_scout::testing::{candidate, target, MockSource};

    #[tokio::test]
    async fn bearer_secret_runs_a_scan() {
        let t = target("sotorasib");
        let (router, store) = app(vec![
            MockSource::new("pubmed").with_items(vec![candidate(t.id, "1", "Paper")]),
            MockSource::new("newsapi").with_error("HTTP 503 after 3 retries"),
        ]);
        store.add_target(t);

        let (status, body) = post_json(
            router,
            "/scan",
            &[("authorization", "Bearer s3cret")],
            json!({ "period": "daily", "mode": "comprehensive" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["totalFound"], 1);
        assert_eq!(body["newFound"], 1);
        assert_eq!(body["failedSources"][0]["source"], "newsapi");
        assert!(body["scanRunId"].is_string());
    }

    #[tokio::test]
    async fn same_origin_is_accepted_and_failed_sources_omitted_when_clean() {
        let (router, store) = app(vec![MockSource::new("pubmed")]);
        store.add_target(target("x"));

        let (status, body) = post_json(
            router,
            "/scan",
            &[("origin", "https://watch.example.com")],
            json!({ "period": "daily" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("failedSources").is_none());
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected_before_any_write() {
        let (router, store) = app(vec![MockSource::new("pubmed")]);

        let (status, body) = post_json(
            router,
            "/scan",
            &[("authorization", "Bearer wrong")],
            json!({ "period": "daily" }),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], false);
        assert!(store.scan_runs().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        for payload in [
            json!({ "period": "hourly" }),
            json!({ "period": "daily", "targetIds": ["not-a-uuid"] }),
            json!({ "period": "daily", "sources": ["twitter"] }),
            json!({ "mode": "latest" }),
        ] {
            let (router, store) = app(vec![MockSource::new("pubmed")]);
            let (status, body) =
                post_json(router, "/scan", &[("authorization", "Bearer s3cret")], payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["ok"], false);
            assert!(store.scan_runs().is_empty());
        }
    }
}
