//! Append-only JSON-lines journal.
//!
//! One line per committed batch. A batch is replayed entirely or not at all:
//! a torn trailing line (crash mid-write) is cut off when the journal is
//! opened, and a failed append truncates the file back to its previous length.

use crate::error::StoreError;
use crate::models::{Alert, Device, TelemetryRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreWrite {
    UpsertDevice(Device),
    AppendTelemetry(TelemetryRecord),
    AppendAlert(Alert),
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
}

impl Journal {
    /// Opens (or creates) the journal and returns the batches it already holds.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Vec<StoreWrite>>), StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        // Everything after the last newline is a torn write.
        let valid_len = content
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        if valid_len < content.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = content.len() - valid_len,
                "dropping incomplete trailing journal entry"
            );
        }

        let mut batches = Vec::new();
        for (lineno, line) in content[..valid_len].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<Vec<StoreWrite>>(line) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable journal entry"
                ),
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len = valid_len as u64;
        if len < content.len() as u64 {
            file.set_len(len).await?;
        }

        info!(path = %path.display(), batches = batches.len(), "journal opened");
        Ok((Self { path, file, len }, batches))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `batch` as a single line and syncs it to disk.
    pub async fn append(&mut self, batch: &[StoreWrite]) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&line).await {
            if let Err(trunc) = self.file.set_len(self.len).await {
                warn!(path = %self.path.display(), error = %trunc, "journal rollback failed");
            }
            return Err(e.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceStatus;
    use battery_devkit::ts;

    fn upsert(id: &str) -> StoreWrite {
        StoreWrite::UpsertDevice(Device {
            device_id: id.to_string(),
            last_seen: ts("2025-01-15T10:00:00Z"),
            status: DeviceStatus::Online,
        })
    }

    #[tokio::test]
    async fn test_append_then_reopen_replays_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, replayed) = Journal::open(&path).await.unwrap();
        assert!(replayed.is_empty());
        assert_eq!(journal.path(), path.as_path());
        journal.append(&[upsert("a"), upsert("b")]).await.unwrap();
        journal.append(&[upsert("c")]).await.unwrap();
        drop(journal);

        let (_, replayed) = Journal::open(&path).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], vec![upsert("a"), upsert("b")]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let (mut journal, _) = Journal::open(&path).await.unwrap();
        journal.append(&[upsert("a")]).await.unwrap();
        drop(journal);

        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(br#"[{"op":"upsert_dev"#);
        tokio::fs::write(&path, raw).await.unwrap();

        let (mut journal, replayed) = Journal::open(&path).await.unwrap();
        assert_eq!(replayed.len(), 1);
        journal.append(&[upsert("b")]).await.unwrap();
        drop(journal);

        let (_, replayed) = Journal::open(&path).await.unwrap();
        assert_eq!(replayed, vec![vec![upsert("a")], vec![upsert("b")]]);
    }

    #[test]
    fn test_write_is_tagged_by_op() {
        let v = serde_json::to_value(upsert("a")).unwrap();
        assert_eq!(v["op"], "upsert_device");
        assert_eq!(v["device_id"], "a");
        assert_eq!(v["last_seen"], "2025-01-15T10:00:00Z");
    }
}
