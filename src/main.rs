//! dnsweeper - entry point.
//!
//! Reads one domain per line from the file given as the only argument,
//! analyzes the batch and prints the JSON result array to stdout. Logs go to
//! stderr.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dnsweeper::cache::{MemoryCache, PersistentCache};
use dnsweeper::config::Config;
use dnsweeper::dns::{DohOptions, DohResolver, StatsCollector};
use dnsweeper::http::HttpProbe;
use dnsweeper::jobs::JobOrchestrator;
use dnsweeper::risk::RiskEngine;
use dnsweeper::ruleset::Ruleset;

fn load_config() -> Result<Config> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("dnsweeper.toml"));
    let path = Path::new(config_path.as_ref());
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// One domain per line; blank lines and `#` comments are ignored.
fn read_domains(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read domain list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_ascii_lowercase)
        .collect())
}

/// Clear `running` on Ctrl-C so no further domains are dispatched.
fn spawn_cancel_on_ctrl_c(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight domains...");
            running.store(false, Ordering::SeqCst);
        }
    });
}

async fn run() -> Result<()> {
    let Some(input) = std::env::args_os().nth(1) else {
        bail!("usage: dnsweeper <domains-file>");
    };
    let config = load_config()?;

    dnsweeper::metrics::init(&config.metrics).context("Failed to initialize metrics")?;

    let domains = read_domains(Path::new(&input))?;
    let settings = config.analyze.clone();
    info!(
        domains = domains.len(),
        doh_endpoint = %settings.doh_endpoint,
        concurrency = settings.concurrency,
        qps = settings.qps,
        "starting analysis"
    );

    let stats = Arc::new(StatsCollector::new());
    let cache = MemoryCache::with_capacity(config.cache.max_entries, config.cache_max_ttl());
    let mut resolver = DohResolver::new(DohOptions::from_settings(&settings), cache, Arc::clone(&stats))
        .context("Failed to create DoH resolver")?;
    if let Some(path) = config.persist_path() {
        info!(path = %path.display(), "persistent DoH cache enabled");
        resolver = resolver.with_persistent_cache(PersistentCache::open(path).await);
    }
    let prober = HttpProbe::new().context("Failed to create HTTP prober")?;
    let engine = RiskEngine::from_settings(&config.risk);

    let mut orchestrator = JobOrchestrator::new(resolver, prober, engine, settings.clone()).with_stats(stats);
    if let Some(name) = &settings.ruleset {
        let ruleset = Ruleset::load(&settings.ruleset_dir, name)
            .await
            .with_context(|| format!("Failed to load ruleset {name:?}"))?;
        orchestrator = orchestrator.with_ruleset(ruleset);
    }
    spawn_cancel_on_ctrl_c(orchestrator.cancel_handle());

    let report = orchestrator.run(&domains).await.context("Batch failed")?;

    if let Some(persist) = orchestrator.resolver().persistent_cache() {
        persist.flush().await;
    }

    info!(
        exec_id = %report.exec_id,
        low = report.summary.low,
        medium = report.summary.medium,
        high = report.summary.high,
        "analysis complete"
    );
    for (tag, count) in &report.http_errors {
        info!(tag = %tag, count, "http outcome");
    }

    let output = serde_json::to_string_pretty(&report.results).context("Failed to serialize results")?;
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    run().await
}
