//! Mission text shared by every adapter in a scan.

use targetwatch_common::{truncate, Feedback, FeedbackSignal, ScanMode, WatchTarget};

/// How many recent verdicts feed the mission.
pub const FEEDBACK_LIMIT: u32 = 20;

/// Examples listed per polarity.
const EXAMPLES_PER_SIDE: usize = 5;

pub fn build_mission(mode: ScanMode, targets: &[WatchTarget], feedback: &[FeedbackSignal]) -> String {
    let mut out = String::new();

    out.push_str(match mode {
        ScanMode::Latest => {
            "Find the most recent material developments for the targets below, \
             favouring items from the last few days."
        }
        ScanMode::Comprehensive => {
            "Survey the targets below broadly and in depth, including older but \
             still material developments and less obvious sources."
        }
    });

    out.push_str("\n\nMonitoring goals:");
    for t in targets {
        out.push_str(&format!("\n- {}: {}", t.label(), t.monitoring_goal()));
    }

    let favoured: Vec<&FeedbackSignal> = feedback
        .iter()
        .filter(|f| f.feedback == Feedback::Good)
        .take(EXAMPLES_PER_SIDE)
        .collect();
    let disfavoured: Vec<&FeedbackSignal> = feedback
        .iter()
        .filter(|f| f.feedback == Feedback::Bad)
        .take(EXAMPLES_PER_SIDE)
        .collect();

    if !favoured.is_empty() {
        out.push_str("\n\nThe user found items like these useful; look for more of this kind:");
        for f in favoured {
            out.push_str(&format!("\n- {}", example(f)));
        }
    }
    if !disfavoured.is_empty() {
        out.push_str("\n\nThe user marked items like these as noise; avoid this kind:");
        for f in disfavoured {
            out.push_str(&format!("\n- {}", example(f)));
        }
    }

    out
}

fn example(f: &FeedbackSignal) -> String {
    match &f.source {
        Some(source) => format!("{} ({source})", truncate(&f.title, 160)),
        None => truncate(&f.title, 160),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::target;
    use targetwatch_common::DEFAULT_MONITORING_GOAL;

    fn signal(feedback: Feedback, title: &str) -> FeedbackSignal {
        FeedbackSignal {
            feedback,
            title: title.into(),
            source: Some("pubmed".into()),
        }
    }

    #[test]
    fn mission_includes_mode_goals_and_feedback() {
        let mut a = target("sotorasib");
        a.notes = Some("trial discontinuations only".into());
        let b = target("adagrasib");

        let mission = build_mission(
            ScanMode::Comprehensive,
            &[a, b],
            &[signal(Feedback::Good, "Phase 3 halted"), signal(Feedback::Bad, "Stock tips")],
        );

        assert!(mission.starts_with("Survey the targets"));
        assert!(mission.contains("- sotorasib: trial discontinuations only"));
        assert!(mission.contains(&format!("- adagrasib: {DEFAULT_MONITORING_GOAL}")));
        assert!(mission.contains("useful; look for more of this kind:\n- Phase 3 halted (pubmed)"));
        assert!(mission.contains("noise; avoid this kind:\n- Stock tips (pubmed)"));
    }

    #[test]
    fn no_feedback_sections_without_feedback() {
        let mission = build_mission(ScanMode::Latest, &[target("x")], &[]);
        assert!(!mission.contains("useful"));
        assert!(!mission.contains("noise"));
    }
}
