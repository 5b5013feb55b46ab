use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Version stamp of a ruleset directory, recorded in snapshots.
///
/// An unreadable or missing directory reports zero files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetMeta {
    pub count: usize,
    pub latest: Option<String>,
}

impl RulesetMeta {
    pub async fn scan(dir: &Path) -> Self {
        match scan_dir(dir).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::trace!(dir = ?dir, error = %err, "ruleset directory not readable");
                Self::default()
            }
        }
    }
}

async fn scan_dir(dir: &Path) -> std::io::Result<RulesetMeta> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    let mut latest: Option<SystemTime> = None;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        count += 1;
        if let Ok(modified) = metadata.modified() {
            latest = Some(latest.map_or(modified, |current| current.max(modified)));
        }
    }

    Ok(RulesetMeta {
        count,
        latest: latest.map(|time| DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_report_empty_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let meta = RulesetMeta::scan(&dir.path().join("nope")).await;
        assert_eq!(meta, RulesetMeta::default());
    }

    #[tokio::test]
    async fn should_count_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let meta = RulesetMeta::scan(dir.path()).await;
        assert_eq!(meta.count, 2);
        let latest = meta.latest.unwrap();
        assert!(DateTime::parse_from_rfc3339(&latest).is_ok());
        assert!(latest.ends_with('Z'));
    }
}
