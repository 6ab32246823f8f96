use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::ai::ProviderKind;

static SAFETY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"critical|high.*risk|safety.*issue|danger").expect("valid regex")
});
static QUALITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"quality|defect|scratch|damage|non-conformance").expect("valid regex")
});
static DEVIATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"deviation|incorrect|wrong|error|non-compliance").expect("valid regex")
});
static COMPLIANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)compliance.*score.*?(\d+)").expect("valid regex")
});

/// Score assumed when the report does not state one.
pub const DEFAULT_COMPLIANCE_SCORE: u32 = 85;

/// Keyword tallies pulled from a finished report. Heuristic only; the report
/// text stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub safety_issues: usize,
    pub quality_issues: usize,
    pub process_deviations: usize,
    pub compliance_score: u32,
    pub provider: ProviderKind,
    pub frames_analyzed: usize,
    pub reference_images: usize,
}

impl AnalysisStats {
    pub fn from_report(
        report: &str,
        provider: ProviderKind,
        frames_analyzed: usize,
        reference_images: usize,
    ) -> Self {
        let text = report.to_lowercase();
        Self {
            safety_issues: SAFETY_RE.find_iter(&text).count(),
            quality_issues: QUALITY_RE.find_iter(&text).count(),
            process_deviations: DEVIATION_RE.find_iter(&text).count(),
            compliance_score: compliance_score(&text),
            provider,
            frames_analyzed,
            reference_images,
        }
    }

    /// The assistant turn posted right after a successful analysis.
    pub fn summary(&self) -> String {
        format!(
            "Analysis complete using {}!\n\n\
             **Analysis Results:**\n\
             - {} video frames analyzed\n\
             - {} reference SOPs compared\n\
             - {} safety issues found\n\
             - {} quality concerns identified\n\
             - {} process deviations detected\n\
             - Compliance Score: {}/100\n\n\
             Ask me specific questions about any findings!",
            self.provider.display_name(),
            self.frames_analyzed,
            self.reference_images,
            self.safety_issues,
            self.quality_issues,
            self.process_deviations,
            self.compliance_score,
        )
    }
}

fn compliance_score(text: &str) -> u32 {
    COMPLIANCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|score| score.min(100))
        .unwrap_or(DEFAULT_COMPLIANCE_SCORE)
}
