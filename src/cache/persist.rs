//! Append-only JSONL log backing the resolver cache across runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::ResolverCache;
use crate::dns::{QType, ResolveResult};

/// One line of the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    k: String,
    result: ResolveResult,
    /// Epoch milliseconds.
    expires_at: i64,
}

enum WriterCommand {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Resolver cache persisted as one JSON line per stored answer.
///
/// Reads are served from an in-memory index built when the log is opened.
/// Writes update the index immediately and are appended to the file by a
/// background task, so a failing disk never slows down or fails a lookup.
#[derive(Clone)]
pub struct PersistentCache {
    entries: Arc<Mutex<HashMap<String, PersistedEntry>>>,
    writer: mpsc::UnboundedSender<WriterCommand>,
    path: PathBuf,
}

fn cache_key(qname: &str, qtype: QType) -> String {
    format!("{qname}|{qtype}")
}

impl PersistentCache {
    /// Open the log at `path`, replaying live entries into memory.
    ///
    /// Must be called from within a tokio runtime; the writer task is
    /// spawned here.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent).await
        {
            tracing::warn!(path = ?parent, error = ?err, "failed to create cache directory");
        }

        let entries = replay(&path).await;
        tracing::debug!(path = ?path, entries = entries.len(), "persistent cache loaded");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), rx));

        Self {
            entries: Arc::new(Mutex::new(entries)),
            writer: tx,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every line queued so far has been written.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriterCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn replay(path: &Path) -> HashMap<String, PersistedEntry> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(err) => {
            tracing::warn!(path = ?path, error = ?err, "failed to read persistent cache");
            return HashMap::new();
        }
    };

    let now = Utc::now().timestamp_millis();
    let mut entries = HashMap::new();
    let mut skipped = 0usize;
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<PersistedEntry>(line) {
            Ok(entry) if entry.expires_at > now => {
                entries.insert(entry.k.clone(), entry);
            }
            Ok(entry) => {
                entries.remove(&entry.k);
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(path = ?path, skipped, "skipped malformed cache lines");
    }
    entries
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Line(line) => {
                if let Err(err) = append_line(&path, &line).await {
                    tracing::warn!(path = ?path, error = ?err, "failed to append to persistent cache");
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

impl ResolverCache for PersistentCache {
    fn get(&self, qname: &str, qtype: QType) -> Option<ResolveResult> {
        let key = cache_key(qname, qtype);
        let mut entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if entry.expires_at > Utc::now().timestamp_millis() {
            return Some(entry.result.clone());
        }
        entries.remove(&key);
        None
    }

    fn put(&self, qname: &str, qtype: QType, result: ResolveResult, ttl_secs: u32) {
        let entry = PersistedEntry {
            k: cache_key(qname, qtype),
            result,
            expires_at: Utc::now().timestamp_millis() + i64::from(ttl_secs) * 1000,
        };
        match serde_json::to_string(&entry) {
            Ok(line) => {
                if self.writer.send(WriterCommand::Line(line)).is_err() {
                    tracing::warn!(path = ?self.path, "persistent cache writer stopped");
                }
            }
            Err(err) => tracing::warn!(error = ?err, "failed to encode cache entry"),
        }
        self.entries.lock().insert(entry.k.clone(), entry);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Default location of the persistent DoH cache.
///
/// - Linux: `~/.cache/dnsweeper/doh-cache.jsonl`
/// - macOS: `~/Library/Caches/dnsweeper/doh-cache.jsonl`
///
/// Falls back to `./.tmp/doh-cache.jsonl` if the cache directory cannot be determined.
#[must_use]
pub fn default_persist_path() -> PathBuf {
    dirs::cache_dir().map_or_else(
        || PathBuf::from(".tmp/doh-cache.jsonl"),
        |p| p.join("dnsweeper").join("doh-cache.jsonl"),
    )
}
