use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::SourceError;

/// One raw notification message as the mailbox collaborator hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Fetch window handed to the message source. `offset` skips messages
/// already covered by earlier passes of a chunked full reprocess; `max`
/// bounds one invocation's work.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchFilter {
    pub after: Option<DateTime<Utc>>,
    pub offset: usize,
    pub max: usize,
}

/// Mailbox collaborator. The engine only ever asks for unprocessed messages
/// in a window and reports back which ones reached the sinks; query
/// construction and pagination live behind this trait.
#[async_trait]
pub trait MessageSource {
    async fn fetch(&self, filter: FetchFilter) -> Result<Vec<RawMessage>, SourceError>;

    /// Record that a message's slot state was delivered. Only called after
    /// successful sink delivery; a marked message is never fetched again.
    async fn mark_processed(&self, id: &str) -> Result<(), SourceError>;
}

/// In-memory source for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySource {
    messages: Vec<RawMessage>,
    processed: Mutex<HashSet<String>>,
}

impl MemorySource {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            processed: Mutex::new(HashSet::new()),
        }
    }

    pub fn processed_ids(&self) -> HashSet<String> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn fetch(&self, filter: FetchFilter) -> Result<Vec<RawMessage>, SourceError> {
        let processed = self.processed.lock().unwrap();
        Ok(self
            .messages
            .iter()
            .filter(|m| !processed.contains(&m.id))
            .filter(|m| filter.after.is_none_or(|after| m.received_at >= after))
            .skip(filter.offset)
            .take(filter.max)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: &str) -> Result<(), SourceError> {
        self.processed.lock().unwrap().insert(id.to_string());
        Ok(())
    }
}

/// File-backed source: the mailbox dump is a JSON array of messages, and the
/// processed-marker set is persisted as a JSON array of ids next to it.
#[derive(Debug)]
pub struct JsonFileSource {
    mailbox: PathBuf,
    state: PathBuf,
    processed: Mutex<HashSet<String>>,
}

impl JsonFileSource {
    pub fn new(mailbox: PathBuf, state: PathBuf) -> Result<Self, SourceError> {
        let processed = match std::fs::read(&state) {
            Ok(bytes) => serde_json::from_slice::<Vec<String>>(&bytes)?
                .into_iter()
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            mailbox,
            state,
            processed: Mutex::new(processed),
        })
    }

    fn persist(&self, processed: &HashSet<String>) -> Result<(), SourceError> {
        let mut ids: Vec<&String> = processed.iter().collect();
        ids.sort();
        std::fs::write(&self.state, serde_json::to_vec_pretty(&ids)?)?;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for JsonFileSource {
    async fn fetch(&self, filter: FetchFilter) -> Result<Vec<RawMessage>, SourceError> {
        let bytes = std::fs::read(&self.mailbox)?;
        let mut messages: Vec<RawMessage> = serde_json::from_slice(&bytes)?;
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        let processed = self.processed.lock().unwrap();
        Ok(messages
            .into_iter()
            .filter(|m| !processed.contains(&m.id))
            .filter(|m| filter.after.is_none_or(|after| m.received_at >= after))
            .skip(filter.offset)
            .take(filter.max)
            .collect())
    }

    async fn mark_processed(&self, id: &str) -> Result<(), SourceError> {
        let mut processed = self.processed.lock().unwrap();
        if processed.insert(id.to_string()) {
            self.persist(&processed)?;
        }
        Ok(())
    }
}

/// Durable cursor for chunked full-history reprocessing. This is the only
/// state the engine itself owns.
pub trait OffsetStore {
    fn load(&self) -> Result<usize, std::io::Error>;
    fn store(&self, offset: usize) -> Result<(), std::io::Error>;
}

#[derive(Debug, Default)]
pub struct MemoryOffset {
    offset: Mutex<usize>,
}

impl OffsetStore for MemoryOffset {
    fn load(&self) -> Result<usize, std::io::Error> {
        Ok(*self.offset.lock().unwrap())
    }

    fn store(&self, offset: usize) -> Result<(), std::io::Error> {
        *self.offset.lock().unwrap() = offset;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileOffset {
    path: PathBuf,
}

impl FileOffset {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OffsetStore for FileOffset {
    fn load(&self) -> Result<usize, std::io::Error> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.trim().parse().unwrap_or(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn store(&self, offset: usize) -> Result<(), std::io::Error> {
        std::fs::write(&self.path, offset.to_string())
    }
}
