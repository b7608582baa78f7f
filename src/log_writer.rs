/*!
 * Date-partitioned channel logs
 *
 * Layout: `<root>/<channel address>/<YYYY-MM-DD>`, one shard per UTC day.
 * Each record is `<timestamp> <content>` followed by a blank line. Shards
 * are only ever opened in append mode.
 */

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::decoder::Record;
use crate::error::WriteError;

/// Terminates every record: line end plus a blank separator line
pub const RECORD_SEPARATOR: &str = "\r\n\r\n";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const SHARD_DATE_FORMAT: &str = "%Y-%m-%d";

/// What happened to a record handed to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record appended to this shard
    Written(PathBuf),

    /// Record had no text form and was dropped
    Skipped,
}

/// Appends records to per-channel, per-day shards under a root directory
#[derive(Debug, Clone)]
pub struct LogWriter {
    root: PathBuf,
}

impl LogWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every shard of one channel
    pub fn channel_dir(&self, address: &str) -> PathBuf {
        self.root.join(address)
    }

    /// Shard receiving records written at `at`
    pub fn shard_path(&self, address: &str, at: DateTime<Utc>) -> PathBuf {
        self.channel_dir(address)
            .join(at.format(SHARD_DATE_FORMAT).to_string())
    }

    /// Create the channel directory if needed (idempotent)
    pub async fn ensure_channel_dir(&self, address: &str) -> Result<PathBuf, WriteError> {
        let dir = self.channel_dir(address);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| WriteError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Append a record stamped with the current time
    pub async fn append(&self, address: &str, record: &Record) -> Result<AppendOutcome, WriteError> {
        self.append_at(address, record, Utc::now()).await
    }

    /// Append a record stamped with `at`; the shard is chosen from the same instant
    pub async fn append_at(
        &self,
        address: &str,
        record: &Record,
        at: DateTime<Utc>,
    ) -> Result<AppendOutcome, WriteError> {
        let Some(content) = record.as_text() else {
            return Ok(AppendOutcome::Skipped);
        };

        self.ensure_channel_dir(address).await?;
        let path = self.shard_path(address, at);
        let line = format_record(at, content);

        let append_err = |source| WriteError::Append {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(append_err)?;

        // One write per record so concurrent appenders never interleave mid-line
        file.write_all(line.as_bytes()).await.map_err(append_err)?;
        file.flush().await.map_err(append_err)?;

        Ok(AppendOutcome::Written(path))
    }
}

/// Timestamp in ISO-8601, truncated to whole seconds, no zone suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// One persisted record, separator included
pub fn format_record(at: DateTime<Utc>, content: &str) -> String {
    format!("{} {}{}", format_timestamp(at), content, RECORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_format_timestamp_truncates_subseconds() {
        let ts = at(2024, 3, 9, 7, 5, 1) + chrono::Duration::milliseconds(987);
        assert_eq!(format_timestamp(ts), "2024-03-09T07:05:01");
    }

    #[test]
    fn test_format_record() {
        assert_eq!(
            format_record(at(2024, 1, 2, 3, 4, 5), r#"{"type":"a"}"#),
            "2024-01-02T03:04:05 {\"type\":\"a\"}\r\n\r\n"
        );
    }

    #[test]
    fn test_shard_path_layout() {
        let writer = LogWriter::new("/var/logs");
        assert_eq!(
            writer.shard_path("plebtoken.eth", at(2023, 12, 31, 23, 59, 59)),
            PathBuf::from("/var/logs/plebtoken.eth/2023-12-31")
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_record_skipped() {
        let dir = tempdir().unwrap();
        let writer = LogWriter::new(dir.path());

        let outcome = writer
            .append("addr1", &Record::Unrepresentable(Vec::new()))
            .await
            .unwrap();

        assert_eq!(outcome, AppendOutcome::Skipped);
        assert!(!writer.channel_dir("addr1").exists());
    }

    #[tokio::test]
    async fn test_ensure_channel_dir_idempotent() {
        let dir = tempdir().unwrap();
        let writer = LogWriter::new(dir.path());

        let first = writer.ensure_channel_dir("addr1").await.unwrap();
        let second = writer.ensure_channel_dir("addr1").await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
