// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event store implementations
//!
//! - [`InMemoryEventStore`] for tests and embedding.
//! - [`JsonlEventStore`]: `events.log`, one JSON record per line, fsynced on
//!   every append. A torn trailing line left by a crash is cut off on open;
//!   bytes past the last committed record are cut off before each append.
//!
//! Both keep the full event list in memory for reads; the log is the source
//! of truth only across restarts.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::events::{CorrelationId, Event};
use crate::domain::repository::{EventStore, RepositoryError};

fn read_after(events: &[Event], after_sequence: u64, limit: Option<usize>) -> Vec<Event> {
    let start = events.partition_point(|e| e.sequence <= after_sequence);
    let tail = &events[start..];
    match limit {
        Some(limit) => tail.iter().take(limit).cloned().collect(),
        None => tail.to_vec(),
    }
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &Event) -> Result<(), RepositoryError> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn read_from(&self, after_sequence: u64, limit: Option<usize>) -> Result<Vec<Event>, RepositoryError> {
        Ok(read_after(&self.events.read(), after_sequence, limit))
    }

    async fn find_by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<Event>, RepositoryError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn last_sequence(&self) -> Result<u64, RepositoryError> {
        Ok(self.events.read().last().map(|e| e.sequence).unwrap_or(0))
    }
}

pub struct JsonlEventStore {
    path: PathBuf,
    file: Mutex<LogFile>,
    events: RwLock<Vec<Event>>,
}

struct LogFile {
    handle: tokio::fs::File,
    /// Length of the file up to the end of the last complete record.
    committed: u64,
}

impl LogFile {
    /// Drop anything after the last complete record, so the next line starts
    /// on a record boundary.
    async fn restore_boundary(&mut self, path: &Path) -> Result<(), RepositoryError> {
        let len = self.handle.metadata().await?.len();
        if len != self.committed {
            warn!(path = %path.display(), bytes = len.saturating_sub(self.committed), "Cutting torn bytes after last record");
            self.handle.set_len(self.committed).await?;
        }
        Ok(())
    }
}

impl JsonlEventStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut events: Vec<Event> = Vec::new();
        let mut valid_len = 0usize;
        let mut offset = 0usize;
        for line in bytes.split_inclusive(|b| *b == b'\n') {
            offset += line.len();
            if line.last() != Some(&b'\n') {
                warn!(path = %path.display(), bytes = line.len(), "Discarding torn trailing record");
                break;
            }
            valid_len = offset;
            let text = &line[..line.len() - 1];
            if text.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Event>(text) {
                Ok(event) => {
                    if events.last().is_some_and(|last| last.sequence >= event.sequence) {
                        warn!(sequence = event.sequence, "Skipping out-of-order record");
                        continue;
                    }
                    events.push(event);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if valid_len < bytes.len() {
            file.set_len(valid_len as u64).await?;
        }

        info!(path = %path.display(), events = events.len(), "Opened event log file");
        Ok(Self {
            path,
            file: Mutex::new(LogFile {
                handle: file,
                committed: valid_len as u64,
            }),
            events: RwLock::new(events),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn append(&self, event: &Event) -> Result<(), RepositoryError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.restore_boundary(&self.path).await?;
        let written = async {
            file.handle.write_all(line.as_bytes()).await?;
            file.handle.flush().await?;
            file.handle.sync_data().await
        }
        .await;
        if let Err(e) = written {
            // Best effort: a failed rollback is retried before the next append.
            if let Err(rollback) = file.handle.set_len(file.committed).await {
                warn!(path = %self.path.display(), error = %rollback, "Could not roll back partial record");
            }
            return Err(e.into());
        }
        file.committed += line.len() as u64;
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn read_from(&self, after_sequence: u64, limit: Option<usize>) -> Result<Vec<Event>, RepositoryError> {
        Ok(read_after(&self.events.read(), after_sequence, limit))
    }

    async fn find_by_correlation(&self, correlation_id: CorrelationId) -> Result<Vec<Event>, RepositoryError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn last_sequence(&self) -> Result<u64, RepositoryError> {
        Ok(self.events.read().last().map(|e| e.sequence).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{EventId, EventPayload, SwarmId};
    use chrono::Utc;

    fn event(sequence: u64) -> Event {
        let event_id = EventId::new();
        Event {
            event_id,
            swarm_id: SwarmId::new("store"),
            sequence,
            timestamp: Utc::now(),
            correlation_id: event_id.into(),
            depth: 0,
            payload: EventPayload::ContentChanged { path: format!("{sequence}.py"), diff: None },
        }
    }

    #[tokio::test]
    async fn test_read_from_respects_cursor_and_limit() {
        let store = InMemoryEventStore::new();
        for seq in 1..=5 {
            store.append(&event(seq)).await.unwrap();
        }
        let page: Vec<u64> = store.read_from(2, Some(2)).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(page, vec![3, 4]);
        assert!(store.read_from(5, None).await.unwrap().is_empty());
        assert_eq!(store.last_sequence().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_jsonl_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let first = event(1);
        {
            let store = JsonlEventStore::open(&path).await.unwrap();
            store.append(&first).await.unwrap();
            store.append(&event(2)).await.unwrap();
        }

        let store = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(store.last_sequence().await.unwrap(), 2);
        let chain = store.find_by_correlation(first.correlation_id).await.unwrap();
        assert_eq!(chain, vec![first]);
    }

    #[tokio::test]
    async fn test_jsonl_store_cuts_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        {
            let store = JsonlEventStore::open(&path).await.unwrap();
            store.append(&event(1)).await.unwrap();
        }
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"event_id":"trunc"#).unwrap();
        }

        let store = JsonlEventStore::open(&path).await.unwrap();
        assert_eq!(store.last_sequence().await.unwrap(), 1);
        store.append(&event(2)).await.unwrap();
        drop(store);

        let reopened = JsonlEventStore::open(&path).await.unwrap();
        let sequences: Vec<u64> = reopened.read_from(0, None).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_append_after_partial_write_keeps_every_acknowledged_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let store = JsonlEventStore::open(&path).await.unwrap();
        store.append(&event(1)).await.unwrap();
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"event_id":"half-writ"#).unwrap();
        }
        store.append(&event(2)).await.unwrap();
        store.append(&event(3)).await.unwrap();
        drop(store);

        let reopened = JsonlEventStore::open(&path).await.unwrap();
        let sequences: Vec<u64> = reopened.read_from(0, None).await.unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("half-writ"));
    }
}
