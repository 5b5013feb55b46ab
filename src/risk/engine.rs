//! Rule registry evaluation.

use std::collections::{HashMap, HashSet};

use super::rules::{RiskRule, RiskThresholds, builtin_rules};
use super::types::{RiskContext, RiskItem, RiskLevel};
use crate::config::RiskSettings;

/// Ordered rule registry plus the administrative overrides applied to it.
///
/// Evaluation is pure: the same context always yields the same item.
#[derive(Clone)]
pub struct RiskEngine {
    rules: Vec<RiskRule>,
    thresholds: RiskThresholds,
    weights: HashMap<String, f64>,
    disabled: HashSet<String>,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(builtin_rules(), RiskThresholds::default())
    }
}

impl RiskEngine {
    pub fn new(rules: Vec<RiskRule>, thresholds: RiskThresholds) -> Self {
        Self {
            rules,
            thresholds,
            weights: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    /// Built-in catalog with thresholds, weights and disabled IDs from settings.
    pub fn from_settings(settings: &RiskSettings) -> Self {
        Self::new(builtin_rules(), RiskThresholds::from(settings))
            .with_weights(settings.rules.weights.clone())
            .with_disabled(settings.rules.disabled.iter().cloned())
    }

    #[must_use]
    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    #[must_use]
    pub fn with_disabled(mut self, disabled: impl IntoIterator<Item = String>) -> Self {
        self.disabled = disabled.into_iter().collect();
        self
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.id)
    }

    pub const fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    fn weight(&self, rule: &RiskRule) -> f64 {
        self.weights.get(rule.id).copied().unwrap_or(rule.weight)
    }

    /// Evaluate every rule, or only the `enabled` IDs when given.
    pub fn evaluate(&self, ctx: &RiskContext, enabled: Option<&[&str]>) -> RiskItem {
        let mut total = 0.0;
        let mut evidences = Vec::new();

        let active = self
            .rules
            .iter()
            .filter(|rule| enabled.is_none_or(|ids| ids.contains(&rule.id)))
            .filter(|rule| !self.disabled.contains(rule.id));
        for rule in active {
            if let Some(evidence) = (rule.evaluate)(ctx, &self.thresholds) {
                total += self.weight(rule);
                evidences.push(evidence);
            }
        }

        let score = clamp_score(total);
        RiskItem {
            score,
            level: RiskLevel::from_score(score),
            evidences,
        }
    }
}

/// Clamp to `[0, 100]` and round.
pub fn clamp_score(total: f64) -> u8 {
    if total.is_nan() {
        return 0;
    }
    total.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsStatus, Hop};
    use crate::risk::types::{DnsContext, HttpContext};

    fn failing_context() -> RiskContext {
        RiskContext {
            name: "old-backup.example.com".to_string(),
            dns: Some(DnsContext {
                status: Some(DnsStatus::NxDomain),
                attempts: Some(3),
                chain: vec![],
            }),
            http: Some(HttpContext {
                https_ok: Some(false),
                http_ok: Some(false),
                statuses: vec![],
            }),
            ..RiskContext::default()
        }
    }

    #[test]
    fn should_be_pure() {
        let engine = RiskEngine::default();
        let ctx = failing_context();
        assert_eq!(engine.evaluate(&ctx, None), engine.evaluate(&ctx, None));
    }

    #[test]
    fn should_sum_fired_rules() {
        let item = RiskEngine::default().evaluate(&failing_context(), None);
        // R-001 40 + R-003 15 + R-005 15
        assert_eq!(item.score, 70);
        assert_eq!(item.level, RiskLevel::High);
        let ids: Vec<_> = item.evidences.iter().map(|e| e.rule_id.as_str()).collect();
        assert_eq!(ids, ["R-001", "R-003", "R-005"]);
    }

    #[test]
    fn should_drop_disabled_rule_contribution() {
        let ctx = failing_context();
        let baseline = RiskEngine::default().evaluate(&ctx, None);
        let disabled = RiskEngine::default()
            .with_disabled(["R-001".to_string()])
            .evaluate(&ctx, None);

        assert_eq!(baseline.score - disabled.score, 40);
        assert!(disabled.evidences.iter().all(|e| e.rule_id != "R-001"));
    }

    #[test]
    fn should_shift_total_by_weight_override() {
        let ctx = failing_context();
        let baseline = RiskEngine::default().evaluate(&ctx, None);
        let overridden = RiskEngine::default()
            .with_weights(HashMap::from([("R-003".to_string(), 25.0)]))
            .evaluate(&ctx, None);

        assert_eq!(i32::from(overridden.score) - i32::from(baseline.score), 10);
    }

    #[test]
    fn should_restrict_to_enabled_ids() {
        let item = RiskEngine::default().evaluate(&failing_context(), Some(&["R-003"]));
        assert_eq!(item.score, 15);
        assert_eq!(item.level, RiskLevel::Low);
    }

    #[test]
    fn should_clamp_negative_totals_to_zero() {
        let ctx = RiskContext {
            name: "www.example.com".to_string(),
            proxied: Some(true),
            ..RiskContext::default()
        };
        let item = RiskEngine::default().evaluate(&ctx, None);
        assert_eq!(item.score, 0);
        assert_eq!(item.evidences.len(), 1);
    }

    #[test]
    fn should_clamp_large_totals_to_hundred() {
        let ctx = failing_context();
        let item = RiskEngine::default()
            .with_weights(HashMap::from([("R-001".to_string(), 500.0)]))
            .evaluate(&ctx, None);
        assert_eq!(item.score, 100);
    }

    #[test]
    fn should_read_thresholds_from_settings() {
        let mut settings = RiskSettings::default();
        settings.low_ttl_sec = 600;
        settings.rules.disabled = vec!["R-003".to_string()];
        let engine = RiskEngine::from_settings(&settings);

        let ctx = RiskContext {
            name: "dev.example.com".to_string(),
            dns: Some(DnsContext {
                status: Some(DnsStatus::NoError),
                attempts: Some(0),
                chain: vec![Hop::new("A", "192.0.2.1", Some(300))],
            }),
            ..RiskContext::default()
        };
        let item = engine.evaluate(&ctx, None);
        let ids: Vec<_> = item.evidences.iter().map(|e| e.rule_id.as_str()).collect();
        assert_eq!(ids, ["R-004"]);
    }
}
