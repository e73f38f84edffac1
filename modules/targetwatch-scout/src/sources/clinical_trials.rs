//! ClinicalTrials.gov v2 study search. No credentials required.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use targetwatch_common::{ScanMode, WatchTarget};

use super::{drop_known, CandidateItem, SourceAdapter, SourceContext, SourceOutput};
use crate::infra::retry::{send_with_retry, RetryPolicy};
use crate::infra::util::{non_blank, parse_loose_date};

const STUDIES_URL: &str = "https://clinicaltrials.gov/api/v2/studies";

pub struct ClinicalTrialsSource {
    http: reqwest::Client,
    retry: RetryPolicy,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudiesResponse {
    #[serde(default)]
    studies: Vec<Study>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Study {
    protocol_section: ProtocolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProtocolSection {
    identification_module: IdentificationModule,
    status_module: StatusModule,
    description_module: DescriptionModule,
    sponsor_collaborators_module: SponsorModule,
    design_module: DesignModule,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdentificationModule {
    nct_id: String,
    brief_title: Option<String>,
    official_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusModule {
    overall_status: Option<String>,
    why_stopped: Option<String>,
    last_update_post_date_struct: Option<DateStruct>,
}

#[derive(Debug, Default, Deserialize)]
struct DateStruct {
    date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DescriptionModule {
    brief_summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SponsorModule {
    lead_sponsor: Option<Sponsor>,
}

#[derive(Debug, Default, Deserialize)]
struct Sponsor {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DesignModule {
    phases: Vec<String>,
}

impl ClinicalTrialsSource {
    pub fn new(http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            http,
            retry,
            base_url: STUDIES_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn page_size(mode: ScanMode) -> u32 {
        match mode {
            ScanMode::Latest => 10,
            ScanMode::Comprehensive => 50,
        }
    }

    /// Search terms for a target: its label, plus aliases in comprehensive mode.
    fn queries(target: &WatchTarget, mode: ScanMode) -> Vec<String> {
        let mut queries = vec![target.name.clone()];
        if mode == ScanMode::Comprehensive {
            for term in target.display_name.iter().chain(target.aliases.iter()) {
                let term = term.trim();
                if !term.is_empty() && !queries.iter().any(|q| q.eq_ignore_ascii_case(term)) {
                    queries.push(term.to_string());
                }
            }
        }
        queries
    }

    async fn search(&self, term: &str, mode: ScanMode) -> Result<Vec<Study>, String> {
        let page_size = Self::page_size(mode).to_string();
        let request = self.http.get(&self.base_url).query(&[
            ("query.term", term),
            ("pageSize", page_size.as_str()),
            ("sort", "LastUpdatePostDate:desc"),
            ("format", "json"),
        ]);

        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(|e| format!("request for {term:?} failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {} for {term:?}", status.as_u16()));
        }
        let parsed: StudiesResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable response for {term:?}: {e}"))?;
        Ok(parsed.studies)
    }

    fn to_candidate(study: Study, target: &WatchTarget) -> Option<CandidateItem> {
        let p = study.protocol_section;
        let nct_id = p.identification_module.nct_id.trim().to_string();
        if nct_id.is_empty() {
            return None;
        }
        let title = non_blank(p.identification_module.brief_title)
            .or(non_blank(p.identification_module.official_title))
            .unwrap_or_else(|| nct_id.clone());

        let metadata = serde_json::json!({
            "status": p.status_module.overall_status,
            "why_stopped": p.status_module.why_stopped,
            "phases": p.design_module.phases,
            "sponsor": p.sponsor_collaborators_module.lead_sponsor.map(|s| s.name),
        });

        Some(CandidateItem {
            target_id: target.id,
            url: format!("https://clinicaltrials.gov/study/{nct_id}"),
            external_id: nct_id,
            title,
            abstract_text: non_blank(p.description_module.brief_summary),
            full_text: None,
            published_at: p
                .status_module
                .last_update_post_date_struct
                .and_then(|d| parse_loose_date(&d.date)),
            metadata,
        })
    }
}

#[async_trait]
impl SourceAdapter for ClinicalTrialsSource {
    fn id(&self) -> &'static str {
        "clinicaltrials"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &SourceContext) -> SourceOutput {
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for target in &ctx.targets {
            for term in Self::queries(target, ctx.mode) {
                match self.search(&term, ctx.mode).await {
                    Ok(studies) => items.extend(
                        studies
                            .into_iter()
                            .filter_map(|s| Self::to_candidate(s, target)),
                    ),
                    Err(e) => {
                        warn!(target = target.label(), error = %e, "ClinicalTrials.gov search failed");
                        errors.push(e);
                    }
                }
            }
        }

        let items = drop_known(items, ctx);
        info!(items = items.len(), errors = errors.len(), "ClinicalTrials.gov scan finished");
        SourceOutput::from_parts(items, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::target;

    #[test]
    fn comprehensive_mode_adds_aliases() {
        let mut t = target("sotorasib");
        t.display_name = Some("Lumakras".into());
        t.aliases = vec!["AMG 510".into(), "SOTORASIB".into()];

        assert_eq!(ClinicalTrialsSource::queries(&t, ScanMode::Latest), vec!["sotorasib"]);
        assert_eq!(
            ClinicalTrialsSource::queries(&t, ScanMode::Comprehensive),
            vec!["sotorasib", "Lumakras", "AMG 510"]
        );
        assert!(
            ClinicalTrialsSource::page_size(ScanMode::Comprehensive)
                > ClinicalTrialsSource::page_size(ScanMode::Latest)
        );
    }

    #[test]
    fn study_json_maps_to_candidate() {
        let raw = serde_json::json!({
            "protocolSection": {
                "identificationModule": {"nctId": "NCT01234567", "briefTitle": "A Study of Sotorasib"},
                "statusModule": {
                    "overallStatus": "TERMINATED",
                    "whyStopped": "Sponsor decision",
                    "lastUpdatePostDateStruct": {"date": "2026-02-10", "type": "ACTUAL"}
                },
                "descriptionModule": {"briefSummary": "Phase 3 study in NSCLC."},
                "designModule": {"phases": ["PHASE3"]}
            }
        });
        let study: Study = serde_json::from_value(raw).unwrap();
        let t = target("sotorasib");
        let item = ClinicalTrialsSource::to_candidate(study, &t).unwrap();

        assert_eq!(item.external_id, "NCT01234567");
        assert_eq!(item.url, "https://clinicaltrials.gov/study/NCT01234567");
        assert_eq!(item.abstract_text.as_deref(), Some("Phase 3 study in NSCLC."));
        assert_eq!(item.metadata["status"], "TERMINATED");
        assert!(item.published_at.is_some());
    }
}
