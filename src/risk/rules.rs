//! Built-in scoring rules.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use super::types::{RiskContext, RiskEvidence, RiskLevel};
use crate::config::RiskSettings;
use crate::dns::{DnsStatus, QType, min_ttl};

static SUSPICIOUS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(old|tmp|backup|bk|stg|dev)").expect("valid regex"));
static SPF_RECORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)v=spf1").expect("valid regex"));
static SOFT_ALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)[~?]all\b").expect("valid regex"));

/// Tunables read by the DNS rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskThresholds {
    pub low_ttl_sec: u32,
    pub servfail_min_attempts: u32,
    pub nxdomain_sub_min: u32,
    pub nxdomain_sub_max: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self::from(&RiskSettings::default())
    }
}

impl From<&RiskSettings> for RiskThresholds {
    fn from(settings: &RiskSettings) -> Self {
        Self {
            low_ttl_sec: settings.low_ttl_sec,
            servfail_min_attempts: settings.servfail_min_attempts,
            nxdomain_sub_min: settings.nxdomain_sub_min,
            nxdomain_sub_max: settings.nxdomain_sub_max,
        }
    }
}

pub type RuleFn = fn(&RiskContext, &RiskThresholds) -> Option<RiskEvidence>;

/// One entry of the registry.
#[derive(Clone, Copy)]
pub struct RiskRule {
    pub id: &'static str,
    pub weight: f64,
    pub evaluate: RuleFn,
}

/// The baseline catalog, in evaluation order.
pub fn builtin_rules() -> Vec<RiskRule> {
    vec![
        RiskRule { id: "R-001", weight: 40.0, evaluate: repeated_nxdomain },
        RiskRule { id: "R-002", weight: 10.0, evaluate: servfail_or_timeout },
        RiskRule { id: "R-003", weight: 15.0, evaluate: suspicious_name },
        RiskRule { id: "R-004", weight: 10.0, evaluate: dns_high_risk_hint },
        RiskRule { id: "R-005", weight: 15.0, evaluate: http_all_failed },
        RiskRule { id: "R-006", weight: 10.0, evaluate: http_5xx },
        RiskRule { id: "R-007", weight: 10.0, evaluate: http_404 },
        RiskRule { id: "R-008", weight: 10.0, evaluate: cname_without_terminal },
        RiskRule { id: "R-009", weight: 5.0, evaluate: weak_spf },
        RiskRule { id: "R-010", weight: -10.0, evaluate: proxied },
    ]
}

fn repeated_nxdomain(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    let attempts = ctx.dns_attempts();
    (ctx.dns_status() == Some(DnsStatus::NxDomain) && attempts >= 3).then(|| {
        RiskEvidence::new("R-001", format!("NXDOMAIN x{attempts}"), RiskLevel::High)
            .with_meta(json!({ "attempts": attempts }))
    })
}

fn servfail_or_timeout(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    let status = ctx.dns_status().filter(|status| status.is_failure())?;
    Some(RiskEvidence::new("R-002", format!("DNS {status}"), RiskLevel::Medium))
}

fn suspicious_name(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    SUSPICIOUS_NAME
        .is_match(&ctx.name)
        .then(|| RiskEvidence::new("R-003", "suspicious keywords in name", RiskLevel::Medium))
}

fn dns_high_risk_hint(ctx: &RiskContext, th: &RiskThresholds) -> Option<RiskEvidence> {
    let status = ctx.dns_status();
    let attempts = ctx.dns_attempts();
    let mut reasons = Vec::new();

    if status.is_some_and(DnsStatus::is_failure) && attempts >= th.servfail_min_attempts {
        reasons.push("repeated-servfail-timeout");
    }
    if status == Some(DnsStatus::NxDomain)
        && (th.nxdomain_sub_min..=th.nxdomain_sub_max).contains(&attempts)
    {
        reasons.push("nxdomain-subthreshold");
    }
    if min_ttl(ctx.chain()).is_some_and(|ttl| ttl <= th.low_ttl_sec) {
        reasons.push("low-ttl");
    }

    (!reasons.is_empty()).then(|| {
        RiskEvidence::new("R-004", "dns high-risk hint", RiskLevel::Medium)
            .with_meta(json!({ "reasons": reasons }))
    })
}

fn http_all_failed(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    let http = ctx.http.as_ref().filter(|http| http.ran())?;
    let failed = !http.https_ok.unwrap_or(false) && !http.http_ok.unwrap_or(false);
    failed.then(|| RiskEvidence::new("R-005", "HTTP/TLS all failed", RiskLevel::Medium))
}

fn http_5xx(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    ctx.statuses()
        .iter()
        .any(|status| *status >= 500)
        .then(|| RiskEvidence::new("R-006", "HTTP 5xx observed", RiskLevel::Medium))
}

fn http_404(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    ctx.statuses()
        .contains(&404)
        .then(|| RiskEvidence::new("R-007", "HTTP 404 observed", RiskLevel::Low))
}

fn cname_without_terminal(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    let chain = ctx.chain();
    let has_cname = chain.iter().any(|hop| hop.is(QType::Cname));
    let has_address = chain.iter().any(|hop| hop.is_address());
    (has_cname && !has_address)
        .then(|| RiskEvidence::new("R-008", "CNAME has no terminal A/AAAA", RiskLevel::Medium))
}

fn weak_spf(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    ctx.chain()
        .iter()
        .filter(|hop| hop.is(QType::Txt))
        .any(|hop| SPF_RECORD.is_match(&hop.data) && SOFT_ALL.is_match(&hop.data))
        .then(|| RiskEvidence::new("R-009", "weak SPF (~all/?all)", RiskLevel::Low))
}

fn proxied(ctx: &RiskContext, _: &RiskThresholds) -> Option<RiskEvidence> {
    (ctx.proxied == Some(true))
        .then(|| RiskEvidence::new("R-010", "provider proxied", RiskLevel::Low))
}
