use bytes::Bytes;
use std::{fmt, io};

/// LogIndex is the position of an entry in a replicated log.
///
/// Indexes start from 1. There will be no entry existing at index 0; `LogIndex::zero()` is only
/// used to express "before the first entry" (e.g. an empty log's spearhead).
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogIndex(u64);

impl LogIndex {
    pub fn new(index: u64) -> Self {
        LogIndex(index)
    }

    pub fn zero() -> Self {
        LogIndex(0)
    }

    pub fn start_index() -> Self {
        LogIndex(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn plus(&self, delta: u64) -> LogIndex {
        LogIndex(self.0 + delta)
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LogTerm is the leadership epoch an entry was written in.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LogTerm(u64);

impl LogTerm {
    pub fn new(term: u64) -> Self {
        LogTerm(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LogTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// TermIndexPair unambiguously identifies a log position across leaders.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct TermIndexPair {
    pub term: LogTerm,
    pub index: LogIndex,
}

impl TermIndexPair {
    pub fn new(term: LogTerm, index: LogIndex) -> Self {
        TermIndexPair { term, index }
    }
}

impl fmt::Debug for TermIndexPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.term, self.index)
    }
}

/// LogId identifies a physical log in the storage engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque application data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogPayload(Bytes);

impl LogPayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        LogPayload(data.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&'static str> for LogPayload {
    fn from(s: &'static str) -> Self {
        LogPayload(Bytes::from_static(s.as_bytes()))
    }
}

/// A single log record. Entries without a payload are internal markers written by a leader
/// when its term starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    term: LogTerm,
    index: LogIndex,
    payload: Option<LogPayload>,
}

impl LogEntry {
    pub fn new(term: LogTerm, index: LogIndex, payload: Option<LogPayload>) -> Self {
        LogEntry { term, index, payload }
    }

    pub fn term(&self) -> LogTerm {
        self.term
    }

    pub fn index(&self) -> LogIndex {
        self.index
    }

    pub fn term_index_pair(&self) -> TermIndexPair {
        TermIndexPair::new(self.term, self.index)
    }

    pub fn payload(&self) -> Option<&LogPayload> {
        self.payload.as_ref()
    }

    pub fn is_marker(&self) -> bool {
        self.payload.is_none()
    }
}

/// Snapshot iterator over persisted entries.
pub type PersistedLogIterator = Box<dyn Iterator<Item = LogEntry> + Send>;

#[derive(Copy, Clone, Debug, Default)]
pub struct WriteOptions {
    pub wait_for_sync: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistedLogError {
    #[error("IO failure: {0}")]
    Io(#[from] io::Error),
    #[error("Append is not contiguous. Expected index {expected}, got {actual}")]
    NonContiguousAppend { expected: LogIndex, actual: LogIndex },
}

/// PersistedLog is the storage engine's durable append-only log.
///
/// Log indexes entries starting from 1. Implementations must reject appends that would leave a
/// gap. They are not required to serialize concurrent mutations; `LogCore` does that.
#[async_trait::async_trait]
pub trait PersistedLog: Send + Sync {
    fn id(&self) -> LogId;

    /// Append entries. Blocks until the write has landed.
    fn insert(&self, entries: PersistedLogIterator, options: WriteOptions) -> Result<(), PersistedLogError>;

    /// Append entries. Resolves once the write has landed.
    async fn insert_async(&self, entries: PersistedLogIterator, options: WriteOptions) -> Result<(), PersistedLogError>;

    /// Read entries with an index `>= start`.
    fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError>;

    /// Remove every entry with an index `< stop`.
    fn remove_front(&self, stop: LogIndex) -> Result<(), PersistedLogError>;

    /// Remove every entry with an index `>= start`.
    fn remove_back(&self, start: LogIndex) -> Result<(), PersistedLogError>;
}
