//! Risk levels, evidence and the context rules read from.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dns::{DnsStatus, Hop, QType};

/// Coarse risk classification, ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Level for a clamped engine score: below 30 low, below 60 medium.
    pub const fn from_score(score: u8) -> Self {
        if score < 30 {
            Self::Low
        } else if score < 60 {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Numeric anchor used by the ruleset overlay.
    pub const fn baseline(self) -> f64 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.6,
            Self::High => 0.9,
        }
    }

    /// Requantize an overlay score.
    pub fn from_overlay_score(score: f64) -> Self {
        if score <= 0.4 {
            Self::Low
        } else if score <= 0.7 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a rule fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEvidence {
    pub rule_id: String,
    pub message: String,
    pub severity: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl RiskEvidence {
    pub fn new(rule_id: &str, message: impl Into<String>, severity: RiskLevel) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            message: message.into(),
            severity,
            meta: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskItem {
    /// Clamped to `[0, 100]`.
    pub score: u8,
    pub level: RiskLevel,
    pub evidences: Vec<RiskEvidence>,
}

/// DNS facts visible to the rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnsContext {
    pub status: Option<DnsStatus>,
    /// Failed lookups observed for the name.
    pub attempts: Option<u32>,
    pub chain: Vec<Hop>,
}

/// HTTP facts visible to the rules. Both flags are `None` when probing did
/// not run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpContext {
    pub https_ok: Option<bool>,
    pub http_ok: Option<bool>,
    pub statuses: Vec<u16>,
}

impl HttpContext {
    pub const fn ran(&self) -> bool {
        self.https_ok.is_some() || self.http_ok.is_some()
    }
}

/// Everything a rule may look at for one name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskContext {
    pub name: String,
    pub record_type: Option<QType>,
    pub proxied: Option<bool>,
    pub dns: Option<DnsContext>,
    pub http: Option<HttpContext>,
}

impl RiskContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn dns_status(&self) -> Option<DnsStatus> {
        self.dns.as_ref().and_then(|dns| dns.status)
    }

    pub fn dns_attempts(&self) -> u32 {
        self.dns.as_ref().and_then(|dns| dns.attempts).unwrap_or(0)
    }

    pub fn chain(&self) -> &[Hop] {
        self.dns.as_ref().map_or(&[], |dns| dns.chain.as_slice())
    }

    pub fn statuses(&self) -> &[u16] {
        self.http.as_ref().map_or(&[], |http| http.statuses.as_slice())
    }
}
