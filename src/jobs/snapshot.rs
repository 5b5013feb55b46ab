//! Rotating batch snapshots and resume.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};

use super::result::AnalyzeResult;
use crate::error::SnapshotError;
use crate::ruleset::RulesetMeta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub input_hash: String,
    pub exec_id: String,
    /// RFC 3339 write time.
    pub ts: String,
    pub ruleset: RulesetMeta,
    pub total: usize,
    pub processed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub meta: SnapshotMeta,
    pub results: Vec<AnalyzeResult>,
}

impl JobSnapshot {
    /// Whether this snapshot was taken for the same input and ruleset.
    pub fn matches(&self, input_hash: &str, ruleset: &RulesetMeta) -> bool {
        self.meta.input_hash == input_hash && &self.meta.ruleset == ruleset
    }
}

/// SHA-256 over the domains joined by newlines, hex encoded.
pub fn input_hash<S: AsRef<str>>(domains: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (idx, domain) in domains.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"\n");
        }
        hasher.update(domain.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Paths of the current snapshot and its two previous generations.
pub fn generations(path: &Path) -> [PathBuf; 3] {
    [path.to_path_buf(), with_suffix(path, ".1"), with_suffix(path, ".2")]
}

/// Read the snapshot at `path` if it belongs to this input and ruleset.
///
/// A missing file or a mismatch logs a warning and yields `None`; a file
/// that cannot be read or parsed is an error.
pub async fn load_for_resume(
    path: &Path,
    input_hash: &str,
    ruleset: &RulesetMeta,
) -> Result<Option<JobSnapshot>, SnapshotError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = ?path, "no snapshot to resume from, running full batch");
            return Ok(None);
        }
        Err(source) => {
            return Err(SnapshotError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let snapshot: JobSnapshot =
        serde_json::from_str(&content).map_err(|source| SnapshotError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    if !snapshot.matches(input_hash, ruleset) {
        tracing::warn!(
            path = ?path,
            exec_id = %snapshot.meta.exec_id,
            "resume skipped: snapshot does not match current input or ruleset"
        );
        return Ok(None);
    }

    tracing::info!(
        path = ?path,
        exec_id = %snapshot.meta.exec_id,
        restored = snapshot.results.len(),
        "resuming from snapshot"
    );
    Ok(Some(snapshot))
}

enum WriterCommand {
    Write(String),
    Flush(oneshot::Sender<()>),
}

/// Background snapshot writer. Queued snapshots are coalesced so only the
/// most recent one is written when the disk falls behind.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    path: PathBuf,
}

impl SnapshotWriter {
    /// Spawn the writer task. Must be called from within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), rx));
        Self { tx, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `snapshot` for writing.
    pub fn write(&self, snapshot: &JobSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(json) => {
                let _ = self.tx.send(WriterCommand::Write(json));
            }
            Err(err) => tracing::warn!(error = ?err, "failed to serialize snapshot"),
        }
    }

    /// Wait until every queued snapshot has been written.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Write(mut json) => {
                let mut pending_flush = None;
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WriterCommand::Write(newer) => json = newer,
                        WriterCommand::Flush(done) => {
                            pending_flush = Some(done);
                            break;
                        }
                    }
                }
                if let Err(err) = write_rotated(&path, &json).await {
                    tracing::warn!(path = ?path, error = ?err, "failed to write snapshot");
                }
                if let Some(done) = pending_flush {
                    let _ = done.send(());
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Write `<path>.tmp`, then shift `.1 → .2`, current → `.1`, tmp → current.
async fn write_rotated(path: &Path, json: &str) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, json).await?;

    let [current, first, second] = generations(path);
    ignore_missing(fs::rename(&first, &second).await)?;
    ignore_missing(fs::rename(&current, &first).await)?;
    fs::rename(&tmp, &current).await
}
