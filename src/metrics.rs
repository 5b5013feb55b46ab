//! Prometheus exporter setup and the metric names recorded by a batch.

use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

pub const DOMAINS_TOTAL: &str = "dnsweeper_domains_total";
pub const DOMAIN_DURATION: &str = "dnsweeper_domain_duration_seconds";
pub const DOH_QUERIES_TOTAL: &str = "dnsweeper_doh_queries_total";
pub const DOH_QUERY_DURATION: &str = "dnsweeper_doh_query_duration_seconds";
pub const DOH_CACHE_HITS_TOTAL: &str = "dnsweeper_doh_cache_hits_total";
pub const PROBES_TOTAL: &str = "dnsweeper_probe_total";

/// Install the exporter when enabled.
///
/// When disabled nothing is installed and every `metrics::*!` call in the
/// crate is a no-op.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    describe_counter!(DOMAINS_TOTAL, "Domains analyzed, by resulting action");
    describe_histogram!(DOMAIN_DURATION, Unit::Seconds, "Wall time spent analyzing one domain");
    describe_counter!(DOH_QUERIES_TOTAL, "DoH lookups sent, by resulting status");
    describe_histogram!(DOH_QUERY_DURATION, Unit::Seconds, "DoH lookup latency including retries");
    describe_counter!(DOH_CACHE_HITS_TOTAL, "Lookups answered from a cache");
    describe_counter!(PROBES_TOTAL, "HTTP probes, by outcome");

    tracing::info!(listen = %config.listen, "metrics exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_skip_disabled_exporter() {
        assert!(init(&MetricsConfig::default()).is_ok());
    }
}
