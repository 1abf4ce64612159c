use crate::log_core::{
    LogEntry, LogId, LogIndex, PersistedLog, PersistedLogError, PersistedLogIterator, WriteOptions,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// Nothing here survives a restart. It exists so that the replication protocol can be exercised
// without a storage engine, and it checks the same contiguity rules a durable log must.
pub struct InMemoryPersistedLog {
    id: LogId,
    entries: Mutex<VecDeque<LogEntry>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryPersistedLog {
    pub fn new(id: LogId) -> Self {
        InMemoryPersistedLog {
            id,
            entries: Mutex::new(VecDeque::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Creates a log pre-populated with `entries`, e.g. to simulate what a previous leader left
    /// behind.
    pub fn with_entries(id: LogId, entries: Vec<LogEntry>) -> Result<Self, PersistedLogError> {
        let log = Self::new(id);
        log.append(entries.into_iter())?;
        Ok(log)
    }

    /// Makes every following mutation fail with an IO error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Copy of everything currently stored.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .expect("InMemoryPersistedLog mutex guard poison")
    }

    fn check_writable(&self) -> Result<(), PersistedLogError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(PersistedLogError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }

    fn append(&self, entries: impl Iterator<Item = LogEntry>) -> Result<(), PersistedLogError> {
        self.check_writable()?;

        let mut log = self.lock();
        // Validate the whole batch before mutating so a failed append leaves no partial write.
        let mut expected = log.back().map(|e| e.index().plus(1));
        let mut staged = Vec::new();
        for entry in entries {
            if let Some(expected) = expected {
                if entry.index() != expected {
                    return Err(PersistedLogError::NonContiguousAppend {
                        expected,
                        actual: entry.index(),
                    });
                }
            }
            expected = Some(entry.index().plus(1));
            staged.push(entry);
        }

        log.extend(staged);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistedLog for InMemoryPersistedLog {
    fn id(&self) -> LogId {
        self.id
    }

    fn insert(&self, entries: PersistedLogIterator, _: WriteOptions) -> Result<(), PersistedLogError> {
        self.append(entries)
    }

    async fn insert_async(&self, entries: PersistedLogIterator, _: WriteOptions) -> Result<(), PersistedLogError> {
        // Give other tasks a chance to run so callers can't rely on synchronous completion.
        tokio::task::yield_now().await;
        self.append(entries)
    }

    fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, PersistedLogError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(PersistedLogError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected read failure",
            )));
        }

        let snapshot: Vec<LogEntry> = self
            .lock()
            .iter()
            .filter(|e| e.index() >= start)
            .cloned()
            .collect();

        Ok(Box::new(snapshot.into_iter()))
    }

    fn remove_front(&self, stop: LogIndex) -> Result<(), PersistedLogError> {
        self.check_writable()?;

        let mut log = self.lock();
        while matches!(log.front(), Some(e) if e.index() < stop) {
            log.pop_front();
        }
        Ok(())
    }

    fn remove_back(&self, start: LogIndex) -> Result<(), PersistedLogError> {
        self.check_writable()?;

        let mut log = self.lock();
        while matches!(log.back(), Some(e) if e.index() >= start) {
            log.pop_back();
        }
        Ok(())
    }
}
