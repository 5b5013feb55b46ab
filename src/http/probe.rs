//! HTTP reachability probe.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{LOCATION, USER_AGENT as USER_AGENT_HEADER};
use reqwest::{Client, Method, Response, Url, redirect};
use tokio::time::Instant;

use super::tls::{TLS_TIMEOUT, tls_info};
use super::types::{ProbeErrorType, ProbeOptions, ProbeResult, RedirectHop};
use crate::error::Result;

/// Default User-Agent for probes.
const USER_AGENT: &str = concat!("dnsweeper/", env!("CARGO_PKG_VERSION"));

static DNS_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)dns error|failed to lookup|enotfound|name or service not known|nodename nor servname|no such host")
        .expect("valid regex")
});
static TLS_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tls|ssl|certificate|handshake").expect("valid regex"));
static NET_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)connect|connection|refused|reset|unreachable|econn|ehost|enet|socket|broken pipe")
        .expect("valid regex")
});

/// Trait for reachability probing, so the orchestrator can run against mocks.
pub trait HttpProber: Send + Sync + 'static {
    fn probe(&self, url: &str, opts: &ProbeOptions) -> impl Future<Output = ProbeResult> + Send;
}

struct Exchange {
    status: u16,
    redirects: usize,
    final_url: String,
    history: Vec<RedirectHop>,
}

/// Probe backed by a `reqwest` client that never follows redirects on its
/// own, so every hop can be recorded.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Create a new probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, method: Method, url: &Url, opts: &ProbeOptions) -> reqwest::Result<Response> {
        let mut request = self.client.request(method, url.clone());
        if let Some(user_agent) = &opts.user_agent {
            request = request.header(USER_AGENT_HEADER, user_agent);
        }
        request.send().await
    }

    async fn follow(&self, url: Url, opts: &ProbeOptions) -> reqwest::Result<Exchange> {
        let mut current = url;
        let mut history = Vec::new();
        let mut redirects = 0;

        let mut response = match self.send(opts.method.into(), &current, opts).await {
            Ok(response) => response,
            Err(err) => {
                tracing::trace!(url = %current, error = %err, "first request failed, retrying with GET");
                self.send(Method::GET, &current, opts).await?
            }
        };

        while response.status().is_redirection() && redirects < opts.max_redirects {
            history.push(RedirectHop {
                url: current.to_string(),
                status: Some(response.status().as_u16()),
            });
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok());
            let Some(next) = next else {
                break;
            };
            current = next;
            redirects += 1;
            response = self.send(Method::GET, &current, opts).await?;
        }

        Ok(Exchange {
            status: response.status().as_u16(),
            redirects,
            final_url: current.to_string(),
            history,
        })
    }

    /// Probe `url`, following redirects manually and introspecting TLS
    /// concurrently for HTTPS targets.
    pub async fn probe_url(&self, url: &str, opts: &ProbeOptions) -> ProbeResult {
        let started = Instant::now();
        let Ok(parsed) = Url::parse(url) else {
            return ProbeResult::failed(ProbeErrorType::Unknown, 0);
        };

        let tls_target = (parsed.scheme() == "https")
            .then(|| parsed.host_str().map(|host| (host.to_string(), parsed.port().unwrap_or(443))))
            .flatten();
        let tls = async {
            match &tls_target {
                Some((host, port)) => tls_info(host, *port, TLS_TIMEOUT).await,
                None => None,
            }
        };
        let exchange = tokio::time::timeout(opts.timeout, self.follow(parsed, opts));

        let (tls, outcome) = tokio::join!(tls, exchange);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Err(_) => ProbeResult::failed(ProbeErrorType::Timeout, elapsed_ms),
            Ok(Err(err)) => ProbeResult::failed(classify_error(&err), elapsed_ms),
            Ok(Ok(exchange)) => {
                let mut result = ProbeResult::with_status(exchange.final_url, exchange.status, elapsed_ms);
                result.redirects = exchange.redirects;
                result.history = exchange.history;
                result.tls = tls;
                result
            }
        };

        let outcome = result.error_tag().unwrap_or("ok");
        metrics::counter!(crate::metrics::PROBES_TOTAL, "outcome" => outcome).increment(1);
        tracing::trace!(url, ok = result.ok, status = ?result.status, outcome, "probe finished");
        result
    }
}

impl HttpProber for HttpProbe {
    async fn probe(&self, url: &str, opts: &ProbeOptions) -> ProbeResult {
        self.probe_url(url, opts).await
    }
}

/// Flatten an error and its sources into one message.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn classify_error(err: &reqwest::Error) -> ProbeErrorType {
    if err.is_timeout() {
        return ProbeErrorType::Timeout;
    }
    match classify_message(&error_chain(err)) {
        ProbeErrorType::Unknown if err.is_connect() => ProbeErrorType::Net,
        class => class,
    }
}

/// Classify a transport error message by the patterns it contains.
pub fn classify_message(message: &str) -> ProbeErrorType {
    if message.to_ascii_lowercase().contains("timed out") {
        ProbeErrorType::Timeout
    } else if DNS_ERROR.is_match(message) {
        ProbeErrorType::Dns
    } else if TLS_ERROR.is_match(message) {
        ProbeErrorType::Tls
    } else if NET_ERROR.is_match(message) {
        ProbeErrorType::Net
    } else {
        ProbeErrorType::Unknown
    }
}
