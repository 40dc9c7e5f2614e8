//! Record sinks: where canonical records go once a target succeeds.
//!
//! The orchestrator appends each record exactly once and calls `flush` at
//! the end of a run. A sink error is never retried; it halts the run.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::record::CanonicalRecord;

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory, in append order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CanonicalRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Backend("memory sink lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: tokio::sync::Mutex<BufWriter<tokio::fs::File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: tokio::sync::Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

/// Forwards records to an mpsc receiver owned by the caller.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CanonicalRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CanonicalRecord>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CanonicalRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn append(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Strategy;
    use crate::record::{FieldValue, Fields, Provenance};

    fn record(id: &str) -> CanonicalRecord {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::Text(id.to_uppercase()));
        fields.insert("power_level".into(), FieldValue::Integer(9001));
        CanonicalRecord {
            target_id: id.into(),
            fields,
            provenance: Provenance {
                strategy: Strategy::Lightweight,
                attempts: 1,
                source_url: format!("https://example.org/wiki/{id}"),
            },
        }
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.append(&record("goku")).await.unwrap();
        sink.append(&record("vegeta")).await.unwrap();
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.target_id).collect();
        assert_eq!(ids, ["goku", "vegeta"]);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.append(&record("goku")).await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        // Reopening appends rather than truncating.
        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.append(&record("gohan")).await.unwrap();
        sink.flush().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: CanonicalRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.text("name"), Some("GOKU"));
        assert_eq!(first.integer("power_level"), Some(9001));
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let err = sink.append(&record("goku")).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }
}
