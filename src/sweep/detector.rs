//! Fixed-priority keep/review/delete decision table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dns::{DnsStatus, DnsSummary, QType};
use crate::http::ProbeResult;
use crate::risk::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Review,
    Delete,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Review => "review",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proposed action for one record with a stable reason code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub action: Action,
    pub reason: String,
    pub reason_code: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
}

impl Detection {
    fn new(action: Action, reason: impl Into<String>, reason_code: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            reason: reason.into(),
            reason_code: reason_code.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    fn keep() -> Self {
        Self::new(Action::Keep, "ok", "OK", 0.3)
    }

    fn raise(&mut self, floor: f64) {
        self.confidence = self.confidence.max(floor).clamp(0.0, 1.0);
    }
}

/// Classify a record from its risk level and the DNS and HTTP observations.
///
/// `https` and `http` are `None` when that probe did not run. `record_type`
/// names the referential type (MX or NS) whose target status is carried in
/// `dns.target_status`.
pub fn detect_stale(
    domain: &str,
    risk: Option<RiskLevel>,
    https: Option<&ProbeResult>,
    http: Option<&ProbeResult>,
    dns: Option<&DnsSummary>,
    record_type: Option<QType>,
) -> Detection {
    let status = dns.map(|summary| summary.status);

    if let Some(status) = status.filter(|status| status.is_dead()) {
        return Detection::new(Action::Delete, format!("DNS {status}"), format!("DNS_{status}"), 0.9);
    }

    if let Some(qtype) = record_type.filter(|qtype| qtype.is_referential())
        && dns.and_then(|summary| summary.target_status) == Some(DnsStatus::NxDomain)
    {
        return Detection::new(
            Action::Delete,
            format!("Referential NXDOMAIN ({qtype})"),
            format!("REF_NXDOMAIN_{qtype}"),
            0.85,
        );
    }

    let mut detection = Detection::keep();

    if let Some(summary) = dns.filter(|summary| !summary.chain.is_empty()) {
        let has_cname = summary.hops(QType::Cname).next().is_some();
        let has_address = summary.chain.iter().any(|hop| hop.is_address());
        if has_cname && !has_address {
            detection = Detection::new(Action::Review, "CNAME has no terminal A/AAAA", "CNAME_NO_TERMINAL", 0.75);
        }
    }

    if https.is_some() || http.is_some() {
        let https_ok = https.is_some_and(|probe| probe.ok);
        let http_ok = http.is_some_and(|probe| probe.ok);
        if !https_ok && !http_ok {
            review(&mut detection, "HTTP/TLS all failed", "HTTP_ALL_FAILED", 0.65);
        } else {
            let statuses: Vec<u16> = [https, http]
                .into_iter()
                .flatten()
                .filter_map(|probe| probe.status)
                .collect();
            if statuses.iter().any(|status| *status >= 500) {
                review(&mut detection, "HTTP 5xx", "HTTP_5XX", 0.55);
            } else if statuses.contains(&404) {
                review(&mut detection, "HTTP 404", "HTTP_404", 0.55);
            }
        }
    }

    if risk == Some(RiskLevel::High) {
        detection.raise(0.7);
    }

    tracing::trace!(
        domain,
        action = %detection.action,
        code = %detection.reason_code,
        "stale detection"
    );
    detection
}

fn review(detection: &mut Detection, reason: &str, code: &str, floor: f64) {
    detection.action = Action::Review;
    detection.reason = reason.to_string();
    detection.reason_code = code.to_string();
    detection.raise(floor);
}
