//! Append-only evaluation history, one JSON line per evaluation.
//!
//! Each check gets its own `<logs_dir>/<id>.log`. Rotation and compression of
//! these files happens elsewhere; appends must tolerate the file being
//! truncated or replaced between calls, so the file is reopened every time.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::store::{StoreError, validate_key};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Invalid history log name: {0}")]
    InvalidName(#[from] StoreError),

    #[error("Failed to serialize history entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to append to history log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    logs_dir: PathBuf,
}

impl HistoryLog {
    pub async fn open(logs_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let logs_dir = logs_dir.into();
        fs::create_dir_all(&logs_dir).await?;
        Ok(Self { logs_dir })
    }

    fn log_path(&self, id: &str) -> Result<PathBuf, HistoryError> {
        validate_key(id)?;
        Ok(self.logs_dir.join(format!("{id}.log")))
    }

    /// Append `entry` as a single line to the log of `id`
    pub async fn append<T: Serialize>(&self, id: &str, entry: &T) -> Result<(), HistoryError> {
        let path = self.log_path(id)?;

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// All entries currently in the log of `id`, oldest first
    #[allow(dead_code)] // Public API method
    pub async fn entries(&self, id: &str) -> Result<Vec<serde_json::Value>, HistoryError> {
        let path = self.log_path(id)?;

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(HistoryError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_is_line_per_entry() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::open(dir.path().join("logs")).await.unwrap();

        history.append("abc", &json!({"state": "down"})).await.unwrap();
        history.append("abc", &json!({"state": "up"})).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("logs/abc.log")).unwrap();
        assert_eq!(raw, "{\"state\":\"down\"}\n{\"state\":\"up\"}\n");

        let entries = history.entries("abc").await.unwrap();
        assert_eq!(entries, vec![json!({"state": "down"}), json!({"state": "up"})]);
    }

    #[tokio::test]
    async fn test_append_survives_truncation() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::open(dir.path()).await.unwrap();

        history.append("abc", &json!(1)).await.unwrap();
        std::fs::write(dir.path().join("abc.log"), "").unwrap();
        history.append("abc", &json!(2)).await.unwrap();

        assert_eq!(history.entries("abc").await.unwrap(), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_missing_log_and_bad_names() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::open(dir.path()).await.unwrap();

        assert!(history.entries("never").await.unwrap().is_empty());
        assert!(matches!(
            history.append("../x", &json!({})).await,
            Err(HistoryError::InvalidName(_))
        ));
    }
}
