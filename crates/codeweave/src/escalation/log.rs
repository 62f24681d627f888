//! Append-only JSONL escalation log.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{EscalationError, EscalationRecord};

/// One JSON object per line. Concurrent appends are serialized, and each
/// record goes out in a single write so lines never interleave.
#[derive(Debug)]
pub struct EscalationLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EscalationLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the file (and its parent directory) if needed.
    pub async fn append(&self, record: &EscalationRecord) -> Result<(), EscalationError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: &str) -> EscalationRecord {
        EscalationRecord {
            timestamp: "2026-01-01T00:00:00+00:00".into(),
            request_id: id.into(),
            tool: "sql".into(),
            prompt: "p".into(),
            context: None,
            rendered_prompt: "p".into(),
            classification: None,
            response: "unable".into(),
        }
    }

    #[tokio::test]
    async fn creates_parent_and_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = EscalationLog::new(dir.path().join("logs/escalations.jsonl"));
        log.append(&record("a")).await.unwrap();
        log.append(&record("b")).await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let ids: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<EscalationRecord>(l).unwrap().request_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EscalationLog::new(dir.path().join("esc.jsonl")));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move { log.append(&record(&format!("r{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 16);
        for line in content.lines() {
            serde_json::from_str::<EscalationRecord>(line).unwrap();
        }
    }
}
