//! Per-domain records and the batch report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::progress::JobProgressStats;
use crate::dns::{DnsSummary, DohStats};
use crate::http::ProbeResult;
use crate::risk::{RiskEvidence, RiskLevel};
use crate::sweep::Detection;

/// Why a domain was not probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    PrivateName,
    PrivateIp,
    Nxdomain,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrivateName => "private-name",
            Self::PrivateIp => "private-ip",
            Self::Nxdomain => "nxdomain",
        }
    }
}

/// Outcome for one input domain, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub domain: String,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<ProbeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<ProbeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidences: Option<Vec<RiskEvidence>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srv_probe: Option<ProbeResult>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(flatten)]
    pub detection: Detection,
}

/// Count of final risk levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl RiskSummary {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a AnalyzeResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.record(result.risk);
        }
        summary
    }
}

/// Everything a batch produced, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub exec_id: String,
    pub results: Vec<AnalyzeResult>,
    pub progress: JobProgressStats,
    pub doh: DohStats,
    pub summary: RiskSummary,
    /// Probe outcome tag (`ok` or an error type) to count.
    pub http_errors: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::{Action, detect_stale};

    fn result(domain: &str, risk: RiskLevel) -> AnalyzeResult {
        AnalyzeResult {
            domain: domain.to_string(),
            risk,
            https: None,
            http: None,
            dns: None,
            risk_score: None,
            evidences: None,
            candidates: Vec::new(),
            srv_probe: None,
            skipped: false,
            skip_reason: None,
            detection: detect_stale(domain, Some(risk), None, None, None, None),
        }
    }

    #[test]
    fn should_flatten_detection_and_skip_absent_fields() {
        let mut record = result("a.local", RiskLevel::Low);
        record.skipped = true;
        record.skip_reason = Some(SkipReason::PrivateName);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["action"], "keep");
        assert_eq!(json["reasonCode"], "OK");
        assert_eq!(json["skipReason"], "private-name");
        assert_eq!(json["skipped"], true);
        assert!(json.get("https").is_none());
        assert!(json.get("riskScore").is_none());
        assert!(json.get("candidates").is_none());

        let back: AnalyzeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.detection.action, Action::Keep);
        assert_eq!(back, record);
    }

    #[test]
    fn should_count_levels() {
        let results = [
            result("a", RiskLevel::Low),
            result("b", RiskLevel::High),
            result("c", RiskLevel::High),
        ];
        let summary = RiskSummary::from_results(&results);
        assert_eq!(summary, RiskSummary { low: 1, medium: 0, high: 2 });
    }
}
