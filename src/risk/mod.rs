//! Rule-based risk scoring.

pub mod engine;
pub mod rules;
pub mod types;

pub use engine::{RiskEngine, clamp_score};
pub use rules::{RiskRule, RiskThresholds, RuleFn, builtin_rules};
pub use types::{DnsContext, HttpContext, RiskContext, RiskEvidence, RiskItem, RiskLevel};
