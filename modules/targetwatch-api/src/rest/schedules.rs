use std::sync::Arc;

use axum::{extract::State, response::Json};
use chrono::Utc;
use serde::Serialize;

use targetwatch_scout::TickReport;

use crate::auth::SecretCaller;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TickResponse {
    ok: bool,
    #[serde(flatten)]
    report: TickReport,
}

/// `POST /schedules/tick`: check every schedule once and start due scans.
pub async fn api_tick(
    State(state): State<Arc<AppState>>,
    _caller: SecretCaller,
) -> Result<Json<TickResponse>, ApiError> {
    let report = state.checker.check_and_trigger(Utc::now()).await?;
    Ok(Json(TickResponse { ok: true, report }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, post_json};
    use axum::http::StatusCode;
    use serde_json::json;
    use targetwatch_scout::testing::MockSource;

    #[tokio::test]
    async fn tick_requires_the_secret() {
        let (router, _) = app(vec![MockSource::new("pubmed")]);
        let (status, _) = post_json(
            router,
            "/schedules/tick",
            &[("origin", "https://watch.example.com")],
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tick_reports_checked_schedules() {
        let (router, _) = app(vec![MockSource::new("pubmed")]);
        let (status, body) = post_json(
            router,
            "/schedules/tick",
            &[("authorization", "Bearer s3cret")],
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["checked"], 0);
        assert_eq!(body["triggered"], json!([]));
    }
}
