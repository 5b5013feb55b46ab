//! Bounded-concurrency batch runner binding resolver, prober, risk engine,
//! ruleset overlay and stale detector together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::instrument;

use super::pacing::{FailureWindow, QpsGate};
use super::progress::ProgressTracker;
use super::result::{AnalyzeResult, BatchReport, RiskSummary, SkipReason};
use super::snapshot::{JobSnapshot, SnapshotMeta, SnapshotWriter, input_hash, load_for_resume};
use crate::config::AnalyzeSettings;
use crate::dns::{DnsResolver, DnsStatus, DnsSummary, DohStats, Hop, QType, ResolveResult, StatsCollector};
use crate::error::Result;
use crate::http::{DEFAULT_MAX_REDIRECTS, HttpProber, ProbeMethod, ProbeOptions, ProbeResult};
use crate::net;
use crate::risk::{DnsContext, HttpContext, RiskContext, RiskEngine, RiskLevel};
use crate::ruleset::{OverlayDns, Ruleset, RulesetMeta};
use crate::sweep::detect_stale;

/// Per-domain outcome plus the bookkeeping the batch needs.
#[derive(Debug, Clone)]
pub struct DomainOutcome {
    pub result: AnalyzeResult,
    /// Probing ran and neither scheme answered.
    pub failed: bool,
    /// `ok` or the probe error type, when probing ran.
    pub http_tag: Option<String>,
}

/// URLs derived from SRV answers (`priority weight port target`).
pub fn srv_candidates(chain: &[Hop]) -> Vec<String> {
    let mut candidates = Vec::new();
    for hop in chain.iter().filter(|hop| hop.is(QType::Srv)) {
        let parts: Vec<&str> = hop.data.split_whitespace().collect();
        let [_, _, port, target, ..] = parts.as_slice() else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        match port {
            443 => candidates.push(format!("https://{target}:{port}/")),
            80 => candidates.push(format!("http://{target}:{port}/")),
            _ => {
                candidates.push(format!("https://{target}:{port}/"));
                candidates.push(format!("http://{target}:{port}/"));
            }
        }
    }
    candidates
}

/// Name referenced by an MX (`preference exchange`) or NS answer.
fn referenced_target(hop: &Hop) -> Option<&str> {
    hop.data.split_whitespace().last().filter(|name| !name.is_empty())
}

fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Heuristic level from the base probes: HTTPS up is low, HTTP only is
/// medium, nothing is high.
fn probe_level(https: Option<&ProbeResult>, http: Option<&ProbeResult>) -> RiskLevel {
    if https.is_some_and(|probe| probe.ok) {
        RiskLevel::Low
    } else if http.is_some_and(|probe| probe.ok) {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

struct Worker<R, P> {
    resolver: Arc<R>,
    prober: Arc<P>,
    engine: RiskEngine,
    ruleset: Option<Ruleset>,
    settings: AnalyzeSettings,
    probe_options: ProbeOptions,
}

impl<R, P> Clone for Worker<R, P> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            prober: Arc::clone(&self.prober),
            engine: self.engine.clone(),
            ruleset: self.ruleset.clone(),
            settings: self.settings.clone(),
            probe_options: self.probe_options.clone(),
        }
    }
}

struct Probes {
    https: Option<ProbeResult>,
    http: Option<ProbeResult>,
    srv: Option<ProbeResult>,
    level: RiskLevel,
}

impl<R: DnsResolver, P: HttpProber> Worker<R, P> {
    async fn resolve_all(&self, qname: &str) -> Vec<ResolveResult> {
        let mut set = JoinSet::new();
        for (idx, qtype) in self.settings.dns_types.iter().copied().enumerate() {
            let resolver = Arc::clone(&self.resolver);
            let qname = qname.to_string();
            set.spawn(async move { (idx, resolver.resolve(&qname, qtype).await) });
        }

        let mut slots: Vec<Option<ResolveResult>> = vec![None; self.settings.dns_types.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(err) => tracing::warn!(qname, error = ?err, "resolution task failed"),
            }
        }

        slots
            .into_iter()
            .zip(&self.settings.dns_types)
            .map(|(slot, qtype)| {
                slot.unwrap_or_else(|| ResolveResult::empty(qname, *qtype, DnsStatus::ServFail, 0))
            })
            .collect()
    }

    /// Resolve the A record of the first MX/NS target, if any answer names one.
    async fn check_target(&self, summary: &DnsSummary) -> Option<(QType, DnsStatus)> {
        let (qtype, target) = self
            .settings
            .dns_types
            .iter()
            .copied()
            .filter(|qtype| qtype.is_referential())
            .find_map(|qtype| {
                summary
                    .hops(qtype)
                    .find_map(referenced_target)
                    .map(|target| (qtype, fqdn(target)))
            })?;
        let result = self.resolver.resolve(&target, QType::A).await;
        tracing::debug!(%qtype, target = %target, status = %result.status, "referenced target resolved");
        Some((qtype, result.status))
    }

    async fn probe(&self, domain: &str, candidates: &[String]) -> Probes {
        let https = self
            .prober
            .probe(&format!("https://{domain}/"), &self.probe_options)
            .await;
        let mut http = if https.ok {
            None
        } else {
            Some(
                self.prober
                    .probe(&format!("http://{domain}/"), &self.probe_options)
                    .await,
            )
        };
        let mut level = probe_level(Some(&https), http.as_ref());

        let mut srv = None;
        if self.settings.probe_srv
            && level == RiskLevel::High
            && let Some(url) = candidates.first()
        {
            let result = self.prober.probe(url, &self.probe_options).await;
            if result.ok {
                http = Some(result.clone());
                level = RiskLevel::Medium;
            }
            srv = Some(result);
        }

        Probes {
            https: Some(https),
            http,
            srv,
            level,
        }
    }

    #[instrument(skip_all, fields(domain = %domain))]
    async fn analyze(&self, domain: &str) -> DomainOutcome {
        let settings = &self.settings;
        let qname = fqdn(domain);

        let mut summary = if settings.doh {
            Some(DnsSummary::aggregate(&self.resolve_all(&qname).await))
        } else {
            None
        };
        let status = summary.as_ref().map(|summary| summary.status);
        let all_nxdomain = summary.as_ref().is_some_and(DnsSummary::all_nxdomain);

        let mut skip_reason = all_nxdomain.then_some(SkipReason::Nxdomain);
        if !settings.allow_private {
            if net::is_private_name(domain) {
                skip_reason = Some(SkipReason::PrivateName);
            } else if summary.as_ref().is_some_and(|summary| {
                summary
                    .chain
                    .iter()
                    .any(|hop| net::is_private_answer(&hop.record_type, &hop.data))
            }) {
                skip_reason = Some(SkipReason::PrivateIp);
            }
        }

        let candidates = summary
            .as_ref()
            .map(|summary| srv_candidates(&summary.chain))
            .unwrap_or_default();

        let probes_ran = settings.http_check && skip_reason.is_none();
        let target_check = async {
            match summary.as_ref() {
                Some(summary) if summary.status == DnsStatus::NoError => self.check_target(summary).await,
                _ => None,
            }
        };
        let probing = async {
            if probes_ran {
                self.probe(domain, &candidates).await
            } else {
                Probes {
                    https: None,
                    http: None,
                    srv: None,
                    level: if settings.http_check && all_nxdomain {
                        RiskLevel::High
                    } else {
                        RiskLevel::Low
                    },
                }
            }
        };
        let (target, probes) = tokio::join!(target_check, probing);

        let mut record_type = None;
        if let Some((qtype, target_status)) = target
            && let Some(summary) = summary.as_mut()
        {
            summary.target_status = Some(target_status);
            record_type = Some(qtype);
        }

        let mut heuristic = probes.level;
        match status {
            Some(DnsStatus::NxDomain) => heuristic = RiskLevel::High,
            Some(DnsStatus::ServFail | DnsStatus::Timeout) => heuristic = heuristic.max(RiskLevel::Medium),
            _ => {}
        }

        let ctx = RiskContext {
            name: domain.to_string(),
            record_type,
            proxied: None,
            dns: summary.as_ref().map(|summary| DnsContext {
                status: Some(summary.status),
                attempts: Some(summary.failed_queries()),
                chain: summary.chain.clone(),
            }),
            http: probes_ran.then(|| HttpContext {
                https_ok: probes.https.as_ref().map(|probe| probe.ok),
                http_ok: probes.http.as_ref().map(|probe| probe.ok),
                statuses: [probes.https.as_ref(), probes.http.as_ref()]
                    .into_iter()
                    .flatten()
                    .filter_map(|probe| probe.status)
                    .collect(),
            }),
        };
        let item = self.engine.evaluate(&ctx, None);

        let mut risk = heuristic.max(item.level);
        if skip_reason.is_some() && (!settings.doh || status == Some(DnsStatus::NoError)) {
            risk = RiskLevel::Low;
        }
        let adjusted = match &self.ruleset {
            Some(ruleset) => {
                let dns = OverlayDns {
                    status,
                    chain: summary
                        .as_ref()
                        .map(|summary| summary.chain.as_slice())
                        .unwrap_or_default(),
                };
                ruleset.apply(domain, risk, dns)
            }
            None => risk,
        };
        risk = if settings.no_downgrade {
            adjusted.max(probes.level)
        } else {
            adjusted
        };
        if status == Some(DnsStatus::NxDomain) {
            risk = RiskLevel::High;
        }

        let detection = detect_stale(
            domain,
            Some(risk),
            probes.https.as_ref(),
            probes.http.as_ref(),
            summary.as_ref(),
            record_type,
        );

        let any_ok = [probes.https.as_ref(), probes.http.as_ref()]
            .into_iter()
            .flatten()
            .any(|probe| probe.ok);
        let failed = probes_ran && !any_ok;
        let http_tag = probes_ran.then(|| {
            if any_ok {
                "ok".to_string()
            } else {
                [probes.https.as_ref(), probes.http.as_ref()]
                    .into_iter()
                    .flatten()
                    .find_map(|probe| probe.error_type)
                    .map_or("unknown", |error_type| error_type.as_str())
                    .to_string()
            }
        });

        tracing::debug!(
            %risk,
            action = %detection.action,
            code = %detection.reason_code,
            skipped = ?skip_reason,
            "domain analyzed"
        );

        let include_evidence = settings.include_evidence;
        DomainOutcome {
            result: AnalyzeResult {
                domain: domain.to_string(),
                risk,
                https: probes.https,
                http: probes.http,
                dns: summary,
                risk_score: include_evidence.then_some(item.score),
                evidences: include_evidence.then_some(item.evidences),
                candidates,
                srv_probe: probes.srv,
                skipped: skip_reason.is_some(),
                skip_reason,
                detection,
            },
            failed,
            http_tag,
        }
    }
}

/// Runs a domain list through the pipeline under the configured concurrency,
/// pacing, snapshot and resume settings.
pub struct JobOrchestrator<R, P> {
    worker: Worker<R, P>,
    stats: Option<Arc<StatsCollector>>,
    running: Arc<AtomicBool>,
}

impl<R: DnsResolver, P: HttpProber> JobOrchestrator<R, P> {
    pub fn new(resolver: R, prober: P, engine: RiskEngine, settings: AnalyzeSettings) -> Self {
        let probe_options = ProbeOptions {
            timeout: settings.probe_timeout(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            method: ProbeMethod::Head,
            user_agent: settings.user_agent.clone(),
        };
        Self {
            worker: Worker {
                resolver: Arc::new(resolver),
                prober: Arc::new(prober),
                engine,
                ruleset: None,
                settings,
                probe_options,
            },
            stats: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Apply `ruleset` to every risk level.
    #[must_use]
    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Self {
        self.worker.ruleset = Some(ruleset);
        self
    }

    /// Counters reset at batch start and reported in [`BatchReport::doh`].
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Flag that stops dispatch once cleared. Domains already running finish.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn settings(&self) -> &AnalyzeSettings {
        &self.worker.settings
    }

    pub fn resolver(&self) -> &R {
        &self.worker.resolver
    }

    /// Analyze a single domain outside of a batch.
    pub async fn analyze(&self, domain: &str) -> DomainOutcome {
        self.worker.analyze(domain).await
    }

    async fn resume(&self, hash: &str, ruleset: &RulesetMeta) -> Result<HashMap<String, AnalyzeResult>> {
        let settings = &self.worker.settings;
        let Some(path) = settings.snapshot.as_deref().filter(|_| settings.resume) else {
            return Ok(HashMap::new());
        };
        let restored = load_for_resume(path, hash, ruleset)
            .await?
            .map(|snapshot| {
                snapshot
                    .results
                    .into_iter()
                    .map(|result| (result.domain.clone(), result))
                    .collect()
            })
            .unwrap_or_default();
        Ok(restored)
    }

    /// Analyze `domains`, returning results in input order.
    ///
    /// # Errors
    ///
    /// Fails only when a resume snapshot exists but cannot be read or parsed.
    /// Per-domain failures are folded into the results.
    pub async fn run<S: AsRef<str>>(&self, domains: &[S]) -> Result<BatchReport> {
        let settings = &self.worker.settings;
        let exec_id = uuid::Uuid::new_v4().to_string();
        let hash = input_hash(domains);
        let ruleset_meta = RulesetMeta::scan(&settings.ruleset_dir).await;
        let total = domains.len();

        let restored = self.resume(&hash, &ruleset_meta).await?;
        let slots: Vec<Option<AnalyzeResult>> = domains
            .iter()
            .map(|domain| restored.get(domain.as_ref()).cloned())
            .collect();
        let resumed = slots.iter().filter(|slot| slot.is_some()).count();

        let batch = Arc::new(Batch {
            exec_id: exec_id.clone(),
            input_hash: hash,
            ruleset: ruleset_meta,
            total,
            slots: Mutex::new(slots),
            http_errors: Mutex::new(BTreeMap::new()),
            completed: AtomicUsize::new(0),
            snapshot_every: settings.snapshot_every.max(1),
            writer: settings.snapshot.clone().map(SnapshotWriter::spawn),
            tracker: Arc::new(ProgressTracker::new(total, resumed)),
            window: FailureWindow::new(),
        });

        if let Some(stats) = &self.stats {
            stats.reset();
        }
        let reporter = (!settings.quiet).then(|| batch.tracker.spawn_reporter(settings.progress_interval()));
        tracing::info!(%exec_id, total, resumed, concurrency = settings.concurrency, "batch started");

        let worker = Arc::new(self.worker.clone());
        let gate = QpsGate::new(settings.qps, settings.qps_burst);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, domain) in domains.iter().enumerate() {
            if batch.slots.lock()[idx].is_some() {
                continue;
            }
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!(%exec_id, "cancelled, no further dispatch");
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            gate.acquire().await;
            // cleared while waiting for a slot
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!(%exec_id, "cancelled, no further dispatch");
                drop(permit);
                break;
            }

            let worker = Arc::clone(&worker);
            let batch = Arc::clone(&batch);
            let domain = domain.as_ref().to_string();
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = worker.analyze(&domain).await;
                batch.complete(idx, outcome, started.elapsed()).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = ?err, "domain task failed");
            }
        }

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        if !settings.quiet {
            batch.tracker.log();
        }

        batch.snapshot();
        if let Some(writer) = &batch.writer {
            writer.flush().await;
        }

        let results: Vec<AnalyzeResult> = batch.slots.lock().iter().flatten().cloned().collect();
        let summary = RiskSummary::from_results(&results);
        let doh = self.stats.as_ref().map_or_else(DohStats::default, |stats| stats.snapshot());
        let progress = batch.tracker.stats();
        tracing::info!(
            %exec_id,
            low = summary.low,
            medium = summary.medium,
            high = summary.high,
            elapsed_s = %format!("{:.2}", progress.elapsed_sec),
            fail_rate = %format!("{:.1}%", progress.fail_rate * 100.0),
            "batch finished"
        );
        if settings.doh {
            tracing::info!(
                %exec_id,
                queries = doh.queries(),
                hits = doh.hits,
                misses = doh.misses,
                hit_rate = %format!("{:.1}%", doh.hit_rate()),
                time_spent_ms = doh.time_spent_ms,
                est_saved_ms = doh.estimated_saved_ms(),
                "dns cache"
            );
        }

        let http_errors = batch.http_errors.lock().clone();
        Ok(BatchReport {
            exec_id,
            results,
            progress,
            doh,
            summary,
            http_errors,
        })
    }
}

/// Shared state of one running batch.
struct Batch {
    exec_id: String,
    input_hash: String,
    ruleset: RulesetMeta,
    total: usize,
    slots: Mutex<Vec<Option<AnalyzeResult>>>,
    http_errors: Mutex<BTreeMap<String, u64>>,
    completed: AtomicUsize,
    snapshot_every: usize,
    writer: Option<SnapshotWriter>,
    tracker: Arc<ProgressTracker>,
    window: FailureWindow,
}

impl Batch {
    async fn complete(&self, idx: usize, outcome: DomainOutcome, latency: Duration) {
        self.tracker.record(latency, outcome.failed);
        if let Some(tag) = outcome.http_tag {
            *self.http_errors.lock().entry(tag).or_default() += 1;
        }
        metrics::counter!(
            crate::metrics::DOMAINS_TOTAL,
            "action" => outcome.result.detection.action.as_str()
        )
        .increment(1);
        metrics::histogram!(crate::metrics::DOMAIN_DURATION).record(latency.as_secs_f64());

        self.slots.lock()[idx] = Some(outcome.result);

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if completed % self.snapshot_every == 0 {
            self.snapshot();
        }

        self.window.record_and_pause(outcome.failed).await;
    }

    /// Queue a snapshot of every result written so far.
    fn snapshot(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let results: Vec<AnalyzeResult> = self.slots.lock().iter().flatten().cloned().collect();
        let snapshot = JobSnapshot {
            meta: SnapshotMeta {
                input_hash: self.input_hash.clone(),
                exec_id: self.exec_id.clone(),
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                ruleset: self.ruleset.clone(),
                total: self.total,
                processed: results.len(),
            },
            results,
        };
        writer.write(&snapshot);
    }
}
