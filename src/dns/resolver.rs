//! DNS resolver trait and the DNS-over-HTTPS implementation.
//!
//! Provides abstraction over DNS resolution to enable:
//! - Testing with mock resolvers
//! - Swapping the cache backend without touching the query path

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::time::Instant;

use super::stats::StatsCollector;
use super::types::{DnsStatus, Hop, QType, ResolveResult, type_name};
use crate::cache::{MemoryCache, PersistentCache, ResolverCache};
use crate::config::{AnalyzeSettings, DEFAULT_DOH_ENDPOINT};
use crate::error::Result;

/// User-Agent header value for DoH requests.
const USER_AGENT: &str = concat!("dnsweeper/", env!("CARGO_PKG_VERSION"));

/// Media type of the JSON DoH API.
const DNS_JSON: &str = "application/dns-json";

/// Trait for DNS resolution.
///
/// Resolution never fails: transport problems are folded into the
/// returned [`DnsStatus`].
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolve `qname` for `qtype` and classify the outcome.
    fn resolve(&self, qname: &str, qtype: QType) -> impl Future<Output = ResolveResult> + Send;
}

/// Options for [`DohResolver`].
#[derive(Debug, Clone)]
pub struct DohOptions {
    pub endpoint: String,
    /// Bound on each individual attempt.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Ask the upstream to skip DNSSEC validation.
    pub cd: bool,
}

impl Default for DohOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DOH_ENDPOINT.to_string(),
            timeout: Duration::from_millis(3000),
            retries: 2,
            cd: true,
        }
    }
}

impl DohOptions {
    pub fn from_settings(settings: &AnalyzeSettings) -> Self {
        Self {
            endpoint: settings.doh_endpoint.clone(),
            timeout: settings.dns_timeout(),
            retries: settings.dns_retries,
            ..Self::default()
        }
    }
}

/// Delay before retry number `attempt + 1`.
///
/// Exponential from 200 ms, capped at 1500 ms, plus up to 299 ms of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = 200u64.saturating_mul(1u64 << attempt.min(16)).min(1500);
    let jitter = rand::thread_rng().gen_range(0..300u64);
    Duration::from_millis(base + jitter)
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u16,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
    #[serde(rename = "AD", default)]
    ad: bool,
    #[serde(rename = "CD", default)]
    cd: bool,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
    #[serde(rename = "TTL")]
    ttl: Option<u32>,
}

/// Why a single DoH attempt failed.
#[derive(Debug, thiserror::Error)]
enum QueryError {
    #[error("attempt timed out")]
    Timeout,

    #[error("upstream returned status {0}")]
    HttpStatus(u16),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

async fn send_query(request: reqwest::RequestBuilder) -> std::result::Result<DohResponse, QueryError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(QueryError::HttpStatus(status.as_u16()));
    }
    Ok(response.json::<DohResponse>().await?)
}

/// DNS-over-HTTPS resolver using the JSON API.
///
/// Looks answers up in the persistent cache, then the memory cache, and
/// only then goes to the network.
pub struct DohResolver<C: ResolverCache = MemoryCache> {
    client: Client,
    options: DohOptions,
    cache: C,
    persist: Option<PersistentCache>,
    stats: Arc<StatsCollector>,
}

impl<C: ResolverCache> DohResolver<C> {
    /// Create a new resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(options: DohOptions, cache: C, stats: Arc<StatsCollector>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            options,
            cache,
            persist: None,
            stats,
        })
    }

    /// Back the memory cache with an append-only log.
    #[must_use]
    pub fn with_persistent_cache(mut self, persist: PersistentCache) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn options(&self) -> &DohOptions {
        &self.options
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn persistent_cache(&self) -> Option<&PersistentCache> {
        self.persist.as_ref()
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    fn cached(&self, qname: &str, qtype: QType) -> Option<ResolveResult> {
        if let Some(persist) = &self.persist
            && let Some(hit) = persist.get(qname, qtype)
        {
            return Some(hit);
        }
        self.cache.get(qname, qtype)
    }

    async fn query_once(&self, qname: &str, qtype: QType) -> std::result::Result<DohResponse, QueryError> {
        let request = self
            .client
            .get(&self.options.endpoint)
            .query(&[
                ("name", qname),
                ("type", qtype.as_str()),
                ("cd", if self.options.cd { "1" } else { "0" }),
            ])
            .header(ACCEPT, DNS_JSON);

        tokio::time::timeout(self.options.timeout, send_query(request))
            .await
            .map_err(|_| QueryError::Timeout)?
    }

    fn classify(&self, qname: &str, qtype: QType, body: DohResponse, elapsed_ms: u64) -> ResolveResult {
        let chain = body
            .answer
            .into_iter()
            .map(|answer| Hop::new(type_name(answer.record_type), answer.data, answer.ttl))
            .collect();
        ResolveResult {
            qname: qname.to_string(),
            qtype,
            status: DnsStatus::from_doh_code(body.status),
            chain,
            ad: Some(body.ad),
            cd: Some(body.cd),
            elapsed_ms,
        }
    }

    fn store(&self, result: &ResolveResult) {
        if result.status != DnsStatus::NoError {
            return;
        }
        let Some(ttl) = result.min_ttl() else {
            return;
        };
        self.cache.put(&result.qname, result.qtype, result.clone(), ttl);
        if let Some(persist) = &self.persist {
            persist.put(&result.qname, result.qtype, result.clone(), ttl);
        }
    }

    fn record_miss(&self, started: Instant, status: DnsStatus) -> u64 {
        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.stats.record_miss(elapsed_ms);
        metrics::counter!(crate::metrics::DOH_QUERIES_TOTAL, "status" => status.as_str()).increment(1);
        metrics::histogram!(crate::metrics::DOH_QUERY_DURATION).record(elapsed.as_secs_f64());
        elapsed_ms
    }
}

impl<C: ResolverCache> DnsResolver for DohResolver<C> {
    async fn resolve(&self, qname: &str, qtype: QType) -> ResolveResult {
        if let Some(hit) = self.cached(qname, qtype) {
            self.stats.record_hit();
            metrics::counter!(crate::metrics::DOH_CACHE_HITS_TOTAL).increment(1);
            tracing::trace!(qname, %qtype, "DoH cache hit");
            return hit;
        }

        let started = Instant::now();
        let mut last_error = QueryError::Timeout;
        for attempt in 0..=self.options.retries {
            match self.query_once(qname, qtype).await {
                Ok(body) => {
                    let status = DnsStatus::from_doh_code(body.status);
                    let elapsed_ms = self.record_miss(started, status);
                    let result = self.classify(qname, qtype, body, elapsed_ms);
                    self.store(&result);
                    return result;
                }
                Err(err) => {
                    tracing::debug!(qname, %qtype, attempt, error = %err, "DoH attempt failed");
                    last_error = err;
                }
            }
            if attempt < self.options.retries {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        let status = match last_error {
            QueryError::Timeout => DnsStatus::Timeout,
            _ => DnsStatus::ServFail,
        };
        tracing::debug!(qname, %qtype, %status, "DoH retries exhausted");
        let elapsed_ms = self.record_miss(started, status);
        ResolveResult::empty(qname, qtype, status, elapsed_ms)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mock resolver for testing.
    ///
    /// Unconfigured names resolve to NXDOMAIN.
    #[derive(Clone, Default)]
    pub struct MockResolver {
        pub responses: Arc<Mutex<HashMap<(String, QType), ResolveResult>>>,
        pub resolve_count: Arc<AtomicU64>,
    }

    impl MockResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_response(&self, result: ResolveResult) {
            self.responses
                .lock()
                .insert((result.qname.clone(), result.qtype), result);
        }

        /// Answer `qname` with a single A record.
        pub fn add_address(&self, qname: &str, address: &str) {
            let mut result = ResolveResult::empty(qname, QType::A, DnsStatus::NoError, 5);
            result.chain.push(Hop::new("A", address, Some(300)));
            self.add_response(result);
        }

        pub fn add_status(&self, qname: &str, qtype: QType, status: DnsStatus) {
            self.add_response(ResolveResult::empty(qname, qtype, status, 5));
        }

        pub fn resolve_count(&self) -> u64 {
            self.resolve_count.load(Ordering::SeqCst)
        }
    }

    impl DnsResolver for MockResolver {
        async fn resolve(&self, qname: &str, qtype: QType) -> ResolveResult {
            self.resolve_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .get(&(qname.to_string(), qtype))
                .cloned()
                .unwrap_or_else(|| ResolveResult::empty(qname, qtype, DnsStatus::NxDomain, 5))
        }
    }

    fn answer_with_ttl(qname: &str, ttl: u32) -> ResolveResult {
        let mut result = ResolveResult::empty(qname, QType::A, DnsStatus::NoError, 1);
        result.chain.push(Hop::new("A", "192.0.2.10", Some(ttl)));
        result
    }

    fn options(server: &MockServer, retries: u32, timeout: Duration) -> DohOptions {
        DohOptions {
            endpoint: format!("{}/resolve", server.uri()),
            timeout,
            retries,
            cd: true,
        }
    }

    fn resolver(options: DohOptions) -> DohResolver {
        DohResolver::new(options, MemoryCache::default(), Arc::new(StatsCollector::new())).unwrap()
    }

    fn a_record_body(ttl: u32) -> serde_json::Value {
        serde_json::json!({
            "Status": 0,
            "AD": false,
            "CD": true,
            "Answer": [
                {"name": "www.example.com.", "type": 5, "TTL": 600, "data": "edge.example.net."},
                {"name": "edge.example.net.", "type": 1, "TTL": ttl, "data": "93.184.216.34"}
            ]
        })
    }

    #[tokio::test]
    async fn should_resolve_and_map_answer_types() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .and(query_param("name", "www.example.com"))
            .and(query_param("type", "A"))
            .and(query_param("cd", "1"))
            .and(header("accept", DNS_JSON))
            .respond_with(ResponseTemplate::new(200).set_body_json(a_record_body(120)))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 0, Duration::from_secs(2)));
        let result = resolver.resolve("www.example.com", QType::A).await;

        assert_eq!(result.status, DnsStatus::NoError);
        assert_eq!(result.chain.len(), 2);
        assert_eq!(result.chain[0].record_type, "CNAME");
        assert_eq!(result.chain[1].record_type, "A");
        assert_eq!(result.chain[1].data, "93.184.216.34");
        assert_eq!(result.cd, Some(true));
        assert_eq!(result.min_ttl(), Some(120));
    }

    #[tokio::test]
    async fn should_serve_second_lookup_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(a_record_body(300)))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 0, Duration::from_secs(2)));
        let first = resolver.resolve("www.example.com", QType::A).await;
        let second = resolver.resolve("www.example.com", QType::A).await;

        assert_eq!(first, second);
        let stats = resolver.stats().snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn should_not_cache_nxdomain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"Status": 3})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 0, Duration::from_secs(2)));
        let result = resolver.resolve("gone.example.com", QType::A).await;
        assert_eq!(result.status, DnsStatus::NxDomain);
        assert!(result.chain.is_empty());

        resolver.resolve("gone.example.com", QType::A).await;
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn should_map_other_rcodes_to_servfail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"Status": 5})),
            )
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 0, Duration::from_secs(2)));
        let result = resolver.resolve("refused.example.com", QType::A).await;
        assert_eq!(result.status, DnsStatus::ServFail);
    }

    #[tokio::test]
    async fn should_retry_server_errors_then_report_servfail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 2, Duration::from_secs(2)));
        let result = resolver.resolve("flaky.example.com", QType::A).await;

        assert_eq!(result.status, DnsStatus::ServFail);
        assert!(result.chain.is_empty());
        assert_eq!(resolver.stats().snapshot().misses, 1);
    }

    #[tokio::test]
    async fn should_report_timeout_when_every_attempt_expires() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(a_record_body(60))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 0, Duration::from_millis(50)));
        let result = resolver.resolve("slow.example.com", QType::A).await;

        assert_eq!(result.status, DnsStatus::Timeout);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn should_recover_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(a_record_body(60)))
            .mount(&server)
            .await;

        let resolver = resolver(options(&server, 1, Duration::from_secs(2)));
        let result = resolver.resolve("www.example.com", QType::A).await;
        assert_eq!(result.status, DnsStatus::NoError);
    }

    #[tokio::test]
    async fn should_read_and_fill_persistent_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(a_record_body(300)))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doh.jsonl");
        let persist = PersistentCache::open(&path).await;
        let resolver = resolver(options(&server, 0, Duration::from_secs(2)))
            .with_persistent_cache(persist.clone());

        resolver.resolve("www.example.com", QType::A).await;
        persist.flush().await;

        let reopened = PersistentCache::open(&path).await;
        let fresh = DohResolver::new(
            options(&server, 0, Duration::from_secs(2)),
            MemoryCache::default(),
            Arc::new(StatsCollector::new()),
        )
        .unwrap()
        .with_persistent_cache(reopened);
        let result = fresh.resolve("www.example.com", QType::A).await;

        assert_eq!(result.status, DnsStatus::NoError);
        assert_eq!(fresh.stats().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn should_serve_injected_cache_entries() {
        let cache = crate::cache::memory::tests::MockCache::new();
        cache.put("seeded.example", QType::A, answer_with_ttl("seeded.example", 60), 60);

        let resolver = DohResolver::new(
            DohOptions {
                endpoint: "http://127.0.0.1:1/resolve".to_string(),
                ..DohOptions::default()
            },
            cache.clone(),
            Arc::new(StatsCollector::new()),
        )
        .unwrap();

        let result = resolver.resolve("seeded.example", QType::A).await;
        assert_eq!(result.status, DnsStatus::NoError);
        assert_eq!(cache.get_call_count(), 1);
    }

    #[test]
    fn should_bound_backoff_delay() {
        for attempt in 0..10 {
            let delay = backoff_delay(attempt).as_millis();
            let base = (200u128 << attempt).min(1500);
            assert!(delay >= base && delay < base + 300, "attempt {attempt}: {delay}");
        }
    }
}
