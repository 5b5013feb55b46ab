//! Configuration loading and validation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dns::QType;
use crate::error::{ConfigError, Result, ValidationError};

/// Default DoH endpoint (Google JSON API).
pub const DEFAULT_DOH_ENDPOINT: &str = "https://dns.google/resolve";

/// Main configuration for a dnsweeper run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// Fallback upper bound, in seconds, for how long a resolved answer may
    /// stay cached when `cache.ttlMs` is not set.
    pub default_ttl: Option<u64>,

    /// Risk engine thresholds and rule overrides.
    #[serde(default)]
    pub risk: RiskSettings,

    /// Batch analysis settings.
    #[serde(default)]
    pub analyze: AnalyzeSettings,

    /// Resolver cache settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Thresholds used by the DNS rules of the risk engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RiskSettings {
    /// Minimum chain TTL (seconds) at or below which a TTL anomaly is reported.
    #[serde(default = "default_low_ttl_sec")]
    pub low_ttl_sec: u32,

    /// SERVFAIL/TIMEOUT attempts needed for the DNS high-risk hint.
    #[serde(default = "default_servfail_min_attempts")]
    pub servfail_min_attempts: u32,

    /// Lower bound (inclusive) of NXDOMAIN attempts below the repeated-NXDOMAIN rule.
    #[serde(default = "default_nxdomain_sub_min")]
    pub nxdomain_sub_min: u32,

    /// Upper bound (inclusive) of NXDOMAIN attempts below the repeated-NXDOMAIN rule.
    #[serde(default = "default_nxdomain_sub_max")]
    pub nxdomain_sub_max: u32,

    /// Per-rule weight overrides and disabled rules.
    #[serde(default)]
    pub rules: RuleSettings,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            low_ttl_sec: default_low_ttl_sec(),
            servfail_min_attempts: default_servfail_min_attempts(),
            nxdomain_sub_min: default_nxdomain_sub_min(),
            nxdomain_sub_max: default_nxdomain_sub_max(),
            rules: RuleSettings::default(),
        }
    }
}

/// Administrative overrides for the rule registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSettings {
    /// Rule ID to replacement weight.
    #[serde(default)]
    pub weights: HashMap<String, f64>,

    /// Rule IDs that never contribute.
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Settings for the batch orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AnalyzeSettings {
    /// Overall operations per second once the burst is spent. 0 disables pacing.
    #[serde(default)]
    pub qps: u32,

    /// Operations allowed per rolling second before pacing starts.
    #[serde(default)]
    pub qps_burst: u32,

    /// Width of the worker pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a whole HTTP probe, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// DoH endpoint URL.
    #[serde(default = "default_doh_endpoint")]
    pub doh_endpoint: String,

    /// Interval between progress log lines, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Timeout for a single DoH attempt, in milliseconds.
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    /// Extra DoH attempts after the first failure.
    #[serde(default = "default_dns_retries")]
    pub dns_retries: u32,

    /// Record types resolved for every domain.
    #[serde(default = "default_dns_types")]
    pub dns_types: Vec<QType>,

    /// Resolve names over DoH.
    #[serde(default = "default_true")]
    pub doh: bool,

    /// Probe HTTPS/HTTP reachability.
    #[serde(default = "default_true")]
    pub http_check: bool,

    /// Probe private names and addresses instead of skipping them.
    #[serde(default)]
    pub allow_private: bool,

    /// User-Agent header sent by the prober.
    pub user_agent: Option<String>,

    /// Keep the ruleset overlay from lowering risk below the probe heuristic.
    #[serde(default)]
    pub no_downgrade: bool,

    /// Probe the first SRV-derived URL when both base probes failed.
    #[serde(default)]
    pub probe_srv: bool,

    /// Snapshot file path. Snapshots are disabled when unset.
    #[serde(default = "default_snapshot")]
    pub snapshot: Option<PathBuf>,

    /// Completed domains between two snapshot writes.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,

    /// Reload matching snapshot results before running.
    #[serde(default)]
    pub resume: bool,

    /// Name of the ruleset overlay to apply.
    pub ruleset: Option<String>,

    /// Directory holding `<name>.json` rulesets.
    #[serde(default = "default_ruleset_dir")]
    pub ruleset_dir: PathBuf,

    /// Attach risk score and evidences to results.
    #[serde(default)]
    pub include_evidence: bool,

    /// Suppress periodic progress lines.
    #[serde(default)]
    pub quiet: bool,
}

impl Default for AnalyzeSettings {
    fn default() -> Self {
        Self {
            qps: 0,
            qps_burst: 0,
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
            doh_endpoint: default_doh_endpoint(),
            progress_interval_ms: default_progress_interval_ms(),
            dns_timeout_ms: default_dns_timeout_ms(),
            dns_retries: default_dns_retries(),
            dns_types: default_dns_types(),
            doh: true,
            http_check: true,
            allow_private: false,
            user_agent: None,
            no_downgrade: false,
            probe_srv: false,
            snapshot: default_snapshot(),
            snapshot_every: default_snapshot_every(),
            resume: false,
            ruleset: None,
            ruleset_dir: default_ruleset_dir(),
            include_evidence: false,
            quiet: false,
        }
    }
}

impl AnalyzeSettings {
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub const fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Resolver cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CacheSettings {
    /// Maximum number of cached answers.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Upper bound on how long an answer stays cached, in milliseconds.
    pub ttl_ms: Option<u64>,

    /// Append-only persistent cache.
    #[serde(default)]
    pub doh_persist: PersistSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_ms: None,
            doh_persist: PersistSettings::default(),
        }
    }
}

/// Persistent cache settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Log file path. Defaults to the user cache directory.
    pub path: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_low_ttl_sec() -> u32 {
    30
}

const fn default_servfail_min_attempts() -> u32 {
    2
}

const fn default_nxdomain_sub_min() -> u32 {
    1
}

const fn default_nxdomain_sub_max() -> u32 {
    2
}

const fn default_concurrency() -> usize {
    5
}

const fn default_timeout_ms() -> u64 {
    5000
}

fn default_doh_endpoint() -> String {
    DEFAULT_DOH_ENDPOINT.to_string()
}

const fn default_progress_interval_ms() -> u64 {
    1000
}

const fn default_dns_timeout_ms() -> u64 {
    3000
}

const fn default_dns_retries() -> u32 {
    2
}

fn default_dns_types() -> Vec<QType> {
    vec![QType::A]
}

const fn default_true() -> bool {
    true
}

fn default_snapshot() -> Option<PathBuf> {
    Some(PathBuf::from(".tmp/snapshot.json"))
}

const fn default_snapshot_every() -> usize {
    50
}

fn default_ruleset_dir() -> PathBuf {
    PathBuf::from(".tmp/rulesets")
}

const fn default_cache_max_entries() -> usize {
    500
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Upper bound on how long a resolved answer may stay cached.
    pub fn cache_max_ttl(&self) -> Duration {
        match (self.cache.ttl_ms, self.default_ttl) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(secs)) => Duration::from_secs(secs),
            (None, None) => Duration::from_secs(300),
        }
    }

    /// Path of the persistent DoH cache, when enabled.
    pub fn persist_path(&self) -> Option<PathBuf> {
        if !self.cache.doh_persist.enabled {
            return None;
        }
        Some(
            self.cache
                .doh_persist
                .path
                .clone()
                .unwrap_or_else(crate::cache::default_persist_path),
        )
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let analyze = &self.analyze;
        if analyze.concurrency == 0 {
            return Err(ConfigError::from(ValidationError::ZeroConcurrency).into());
        }
        if analyze.timeout_ms == 0 {
            return Err(ConfigError::from(ValidationError::ZeroTimeout).into());
        }
        if analyze.dns_timeout_ms == 0 {
            return Err(ConfigError::from(ValidationError::ZeroDnsTimeout).into());
        }
        if analyze.progress_interval_ms < 200 {
            return Err(ConfigError::from(ValidationError::ProgressIntervalTooShort).into());
        }
        if analyze.snapshot_every == 0 {
            return Err(ConfigError::from(ValidationError::ZeroSnapshotEvery).into());
        }
        if analyze.dns_types.is_empty() {
            return Err(ConfigError::from(ValidationError::EmptyDnsTypes).into());
        }
        if !analyze.doh_endpoint.starts_with("http://") && !analyze.doh_endpoint.starts_with("https://")
        {
            return Err(ConfigError::from(ValidationError::InvalidDohEndpoint(
                analyze.doh_endpoint.clone(),
            ))
            .into());
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::from(ValidationError::ZeroCacheEntries).into());
        }
        if self.cache.ttl_ms == Some(0) || self.default_ttl == Some(0) {
            return Err(ConfigError::from(ValidationError::ZeroCacheTtl).into());
        }

        if self.risk.nxdomain_sub_min > self.risk.nxdomain_sub_max {
            return Err(ConfigError::from(ValidationError::NxdomainRange {
                min: self.risk.nxdomain_sub_min,
                max: self.risk.nxdomain_sub_max,
            })
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.analyze.concurrency, 5);
        assert_eq!(config.analyze.timeout_ms, 5000);
        assert_eq!(config.analyze.qps, 0);
        assert_eq!(config.analyze.doh_endpoint, DEFAULT_DOH_ENDPOINT);
        assert_eq!(config.analyze.dns_types, vec![QType::A]);
        assert_eq!(config.analyze.dns_retries, 2);
        assert_eq!(config.risk.low_ttl_sec, 30);
        assert_eq!(config.risk.servfail_min_attempts, 2);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.cache_max_ttl(), Duration::from_secs(300));
        assert!(!config.metrics.enabled);
        assert!(config.persist_path().is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            defaultTtl = 120

            [risk]
            lowTtlSec = 10
            servfailMinAttempts = 3
            nxdomainSubMin = 1
            nxdomainSubMax = 2

            [risk.rules]
            weights = { "R-003" = 25.0 }
            disabled = ["R-009"]

            [analyze]
            qps = 20
            qpsBurst = 5
            concurrency = 16
            timeoutMs = 2000
            dohEndpoint = "https://cloudflare-dns.com/dns-query"
            progressIntervalMs = 500
            dnsTypes = ["A", "AAAA", "MX"]
            noDowngrade = true
            ruleset = "prod"

            [cache]
            maxEntries = 1000

            [cache.dohPersist]
            enabled = true
            path = "/tmp/doh.jsonl"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.risk.low_ttl_sec, 10);
        assert_eq!(config.risk.rules.weights.get("R-003"), Some(&25.0));
        assert_eq!(config.risk.rules.disabled, vec!["R-009"]);
        assert_eq!(config.analyze.qps, 20);
        assert_eq!(config.analyze.qps_burst, 5);
        assert_eq!(config.analyze.concurrency, 16);
        assert_eq!(config.analyze.dns_types, vec![QType::A, QType::Aaaa, QType::Mx]);
        assert!(config.analyze.no_downgrade);
        assert_eq!(config.analyze.ruleset.as_deref(), Some("prod"));
        assert_eq!(config.cache_max_ttl(), Duration::from_secs(120));
        assert_eq!(
            config.persist_path(),
            Some(PathBuf::from("/tmp/doh.jsonl"))
        );
    }

    #[test]
    fn test_cache_ttl_ms_wins_over_default_ttl() {
        let toml = r#"
            defaultTtl = 120

            [cache]
            ttlMs = 1500
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.cache_max_ttl(), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let toml = r#"
            [analyze]
            concurrency = 0
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_dns_type_rejected() {
        let toml = r#"
            [analyze]
            dnsTypes = ["A", "BOGUS"]
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let toml = r#"
            [analyze]
            dohEndpoint = "dns.google/resolve"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_inverted_nxdomain_range_rejected() {
        let toml = r#"
            [risk]
            nxdomainSubMin = 3
            nxdomainSubMax = 1
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            [analyze]
            unknownField = 1
        "#;

        assert!(Config::parse(toml).is_err());
    }
}
