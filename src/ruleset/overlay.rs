//! Declarative risk overlay loaded from `<dir>/<name>.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::dns::{DnsStatus, Hop, QType};
use crate::error::RulesetError;
use crate::risk::RiskLevel;

/// Increment applied per matching include or regex entry, and the default
/// increment of a declarative rule.
const MATCH_DELTA: f64 = 0.1;
/// Multiplier applied to each `qtypeWeights` entry per chain hop.
const HOP_FACTOR: f64 = 0.05;
const CNAME_EXTERNAL_DELTA: f64 = 0.1;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesetFile {
    name: Option<String>,
    #[serde(default)]
    domain_includes: Vec<String>,
    #[serde(default)]
    domain_regex: Vec<String>,
    #[serde(default)]
    qtype_weights: HashMap<String, f64>,
    #[serde(default)]
    cname_external_boost: bool,
    default_risk: Option<RiskLevel>,
    #[serde(default)]
    rules: Vec<RuleFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleFile {
    #[serde(default)]
    when: WhenFile,
    risk: Option<RiskLevel>,
    score_delta: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhenFile {
    contains: Option<String>,
    regex: Option<String>,
}

/// One compiled matcher. `contains` and `regex` contribute independently.
#[derive(Debug, Clone)]
struct Check {
    contains: Option<String>,
    regex: Option<Regex>,
    risk: Option<RiskLevel>,
    delta: f64,
}

impl Check {
    fn hits(&self, domain: &str) -> usize {
        let contains = self
            .contains
            .as_deref()
            .is_some_and(|needle| !needle.is_empty() && domain.contains(needle));
        let regex = self.regex.as_ref().is_some_and(|re| re.is_match(domain));
        usize::from(contains) + usize::from(regex)
    }
}

/// DNS facts the overlay looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayDns<'a> {
    pub status: Option<DnsStatus>,
    pub chain: &'a [Hop],
}

/// A compiled ruleset.
#[derive(Debug, Clone)]
pub struct Ruleset {
    pub name: String,
    /// Parsed for completeness; `apply` always starts from the base level.
    pub default_risk: Option<RiskLevel>,
    qtype_weights: HashMap<String, f64>,
    cname_external_boost: bool,
    checks: Vec<Check>,
}

fn compile(name: &str, pattern: &str) -> Result<Regex, RulesetError> {
    Regex::new(pattern).map_err(|source| RulesetError::InvalidRegex {
        name: name.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}

impl Ruleset {
    pub fn path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.json"))
    }

    /// Read and compile `<dir>/<name>.json`.
    pub async fn load(dir: &Path, name: &str) -> Result<Self, RulesetError> {
        let path = Self::path(dir, name);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RulesetError::Read {
                path: path.clone(),
                source,
            })?;
        let ruleset = Self::parse(name, &content).map_err(|err| match err {
            ParseFailure::Json(source) => RulesetError::Parse { path, source },
            ParseFailure::Invalid(err) => err,
        })?;
        tracing::debug!(
            ruleset = %ruleset.name,
            checks = ruleset.checks.len(),
            "ruleset loaded"
        );
        Ok(ruleset)
    }

    /// Compile a ruleset from its JSON text. `fallback_name` is used when the
    /// document carries no `name`.
    pub fn from_json(fallback_name: &str, content: &str) -> Result<Self, RulesetError> {
        Self::parse(fallback_name, content).map_err(|err| match err {
            ParseFailure::Json(source) => RulesetError::Parse {
                path: PathBuf::from(fallback_name),
                source,
            },
            ParseFailure::Invalid(err) => err,
        })
    }

    fn parse(fallback_name: &str, content: &str) -> Result<Self, ParseFailure> {
        let file: RulesetFile = serde_json::from_str(content).map_err(ParseFailure::Json)?;
        let name = file.name.unwrap_or_else(|| fallback_name.to_string());

        let mut checks = Vec::new();
        for needle in file.domain_includes {
            checks.push(Check {
                contains: Some(needle),
                regex: None,
                risk: None,
                delta: MATCH_DELTA,
            });
        }
        for pattern in &file.domain_regex {
            checks.push(Check {
                contains: None,
                regex: Some(compile(&name, pattern)?),
                risk: None,
                delta: MATCH_DELTA,
            });
        }
        for rule in file.rules {
            let regex = match rule.when.regex.as_deref() {
                Some(pattern) => Some(compile(&name, pattern)?),
                None => None,
            };
            checks.push(Check {
                contains: rule.when.contains,
                regex,
                risk: rule.risk,
                delta: rule.score_delta.unwrap_or(MATCH_DELTA),
            });
        }

        Ok(Self {
            name,
            default_risk: file.default_risk,
            qtype_weights: file.qtype_weights,
            cname_external_boost: file.cname_external_boost,
            checks,
        })
    }

    /// Adjust `base` for `domain`.
    pub fn apply(&self, domain: &str, base: RiskLevel, dns: OverlayDns<'_>) -> RiskLevel {
        let mut score = base.baseline();

        for hop in dns.chain {
            let weight = self
                .qtype_weights
                .get(&hop.record_type)
                .copied()
                .unwrap_or(0.0);
            score += weight * HOP_FACTOR;
        }

        if self.cname_external_boost
            && let Some(first) = dns.chain.first()
            && first.is(QType::Cname)
            && !first.data.is_empty()
            && !is_within(&first.data, domain)
        {
            score += CNAME_EXTERNAL_DELTA;
        }

        for check in &self.checks {
            for _ in 0..check.hits(domain) {
                score += check.delta;
                if let Some(floor) = check.risk {
                    score = score.max(floor.baseline());
                }
            }
        }

        if dns.status.is_some_and(DnsStatus::is_dead) {
            score = score.max(RiskLevel::High.baseline());
        }

        RiskLevel::from_overlay_score(round_score(score))
    }
}

enum ParseFailure {
    Json(serde_json::Error),
    Invalid(RulesetError),
}

impl From<RulesetError> for ParseFailure {
    fn from(value: RulesetError) -> Self {
        Self::Invalid(value)
    }
}

/// Whether a CNAME target stays under `domain`, ignoring the trailing dot.
fn is_within(target: &str, domain: &str) -> bool {
    target.trim_end_matches('.').ends_with(domain.trim_end_matches('.'))
}

/// Strip float noise so `0.3 + 0.1` compares as `0.4`.
fn round_score(score: f64) -> f64 {
    (score * 1_000_000.0).round() / 1_000_000.0
}
