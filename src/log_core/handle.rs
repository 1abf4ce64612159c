use crate::log_core::{LogEntry, LogId, LogIndex, PersistedLog, PersistedLogError, PersistedLogIterator, WriteOptions};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LogCoreError {
    #[error("Persisted log failure: {0}")]
    Persisted(#[from] PersistedLogError),
    #[error("Another physical log operation is in progress")]
    OperationInProgress,
}

/// LogCore is the exclusive handle to one physical log.
///
/// It is neither `Clone` nor `Copy`. Ownership moves from one participant to the
/// next, and only the current owner may start new physical operations.
///
/// All mutations are serialized through `operation_lock`. An asynchronous write keeps holding
/// the lock until the write lands, even if the `LogCore` itself has been handed to another
/// participant in the meantime. The write queues on the lock when its future is first polled,
/// and the new owner's operations queue behind it from then on.
pub struct LogCore {
    persisted_log: Arc<dyn PersistedLog>,
    operation_lock: Arc<Mutex<()>>,
}

impl LogCore {
    pub fn new(persisted_log: Arc<dyn PersistedLog>) -> Self {
        LogCore {
            persisted_log,
            operation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn log_id(&self) -> LogId {
        self.persisted_log.id()
    }

    /// Synchronous append. Fails instead of blocking if another operation is outstanding.
    pub fn insert(&self, entries: Vec<LogEntry>, wait_for_sync: bool) -> Result<(), LogCoreError> {
        let _guard = self
            .operation_lock
            .try_lock()
            .map_err(|_| LogCoreError::OperationInProgress)?;

        self.persisted_log
            .insert(into_iter(entries), WriteOptions { wait_for_sync })?;
        Ok(())
    }

    /// Starts an append and returns a future that resolves once the write has landed.
    ///
    /// The returned future does not borrow `self`, so the caller may release its own locks (and
    /// even give up this `LogCore`) while the write is in flight.
    pub fn insert_async(
        &self,
        entries: Vec<LogEntry>,
        wait_for_sync: bool,
    ) -> impl Future<Output = Result<(), LogCoreError>> + Send + 'static {
        let persisted_log = self.persisted_log.clone();
        let operation_lock = self.operation_lock.clone();

        async move {
            let _guard = operation_lock.lock_owned().await;
            persisted_log
                .insert_async(into_iter(entries), WriteOptions { wait_for_sync })
                .await?;
            Ok(())
        }
    }

    /// Truncates everything `>= start`, then appends `entries`, as one physical operation.
    pub fn remove_back_and_insert_async(
        &self,
        start: LogIndex,
        entries: Vec<LogEntry>,
        wait_for_sync: bool,
    ) -> impl Future<Output = Result<(), LogCoreError>> + Send + 'static {
        let persisted_log = self.persisted_log.clone();
        let operation_lock = self.operation_lock.clone();

        async move {
            let _guard = operation_lock.lock_owned().await;
            persisted_log.remove_back(start)?;
            if !entries.is_empty() {
                persisted_log
                    .insert_async(into_iter(entries), WriteOptions { wait_for_sync })
                    .await?;
            }
            Ok(())
        }
    }

    /// Returns a snapshot of every entry `>= start`. Waits for outstanding writes first.
    pub async fn read(&self, start: LogIndex) -> Result<PersistedLogIterator, LogCoreError> {
        let _guard = self.operation_lock.lock().await;
        Ok(self.persisted_log.read(start)?)
    }

    /// Discards every entry `>= start`.
    pub async fn remove_back(&self, start: LogIndex) -> Result<(), LogCoreError> {
        let _guard = self.operation_lock.lock().await;
        Ok(self.persisted_log.remove_back(start)?)
    }

    /// Discards every entry `< stop`.
    pub fn remove_front_async(&self, stop: LogIndex) -> impl Future<Output = Result<(), LogCoreError>> + Send + 'static {
        let persisted_log = self.persisted_log.clone();
        let operation_lock = self.operation_lock.clone();

        async move {
            let _guard = operation_lock.lock_owned().await;
            persisted_log.remove_front(stop)?;
            Ok(())
        }
    }

    /// Gives the physical log back to the storage engine. Consumes the handle.
    pub fn release_persisted_log(self) -> Arc<dyn PersistedLog> {
        self.persisted_log
    }
}

fn into_iter(entries: Vec<LogEntry>) -> PersistedLogIterator {
    Box::new(entries.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_core::{InMemoryPersistedLog, LogPayload, LogTerm};

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(LogTerm::new(term), LogIndex::new(index), Some(LogPayload::from("x")))
    }

    fn indexes(iter: PersistedLogIterator) -> Vec<u64> {
        iter.map(|e| e.index().as_u64()).collect()
    }

    #[tokio::test]
    async fn write_outlives_handle_transfer() {
        let persisted = Arc::new(InMemoryPersistedLog::new(LogId(7)));
        let core = LogCore::new(persisted.clone());

        // Keep the write queued on the operation lock across the move to a new owner.
        let guard = core.operation_lock.clone().lock_owned().await;
        let pending = tokio::spawn(core.insert_async(vec![entry(1, 1), entry(1, 2)], false));
        tokio::task::yield_now().await;
        let moved_core = core;

        // The new owner's read queues behind the write and sees all of it.
        let read = tokio::spawn(async move {
            let entries = moved_core.read(LogIndex::start_index()).await.map(indexes);
            (moved_core, entries)
        });
        tokio::task::yield_now().await;
        assert!(persisted.entries().is_empty());
        assert!(!read.is_finished());

        drop(guard);
        let (moved_core, entries) = read.await.unwrap();
        pending.await.unwrap().unwrap();

        assert_eq!(entries.unwrap(), vec![1, 2]);
        assert_eq!(moved_core.log_id(), LogId(7));
    }

    #[tokio::test]
    async fn remove_back_waits_for_outstanding_operation() {
        let persisted = Arc::new(
            InMemoryPersistedLog::with_entries(LogId(1), (1..=4).map(|i| entry(1, i)).collect()).unwrap(),
        );
        let core = LogCore::new(persisted.clone());
        let guard = core.operation_lock.clone().lock_owned().await;

        let removal = tokio::spawn(async move {
            let res = core.remove_back(LogIndex::new(3)).await;
            res.map(|()| core)
        });
        tokio::task::yield_now().await;
        assert_eq!(persisted.entries().len(), 4);

        drop(guard);
        let core = removal.await.unwrap().unwrap();
        assert_eq!(indexes(core.read(LogIndex::start_index()).await.unwrap()), vec![1, 2]);

        // Nothing at or past `start` is a no-op.
        core.remove_back(LogIndex::new(10)).await.unwrap();
        assert_eq!(persisted.entries().len(), 2);

        persisted.set_fail_writes(true);
        assert!(matches!(
            core.remove_back(LogIndex::new(1)).await,
            Err(LogCoreError::Persisted(PersistedLogError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn sync_insert_refuses_while_busy() {
        let core = LogCore::new(Arc::new(InMemoryPersistedLog::new(LogId(1))));
        let guard = core.operation_lock.clone().lock_owned().await;

        assert!(matches!(
            core.insert(vec![entry(1, 1)], false),
            Err(LogCoreError::OperationInProgress)
        ));

        drop(guard);
        core.insert(vec![entry(1, 1)], false).unwrap();
    }

    #[tokio::test]
    async fn remove_back_and_insert_rewrites_suffix() {
        let persisted = Arc::new(
            InMemoryPersistedLog::with_entries(LogId(1), vec![entry(1, 1), entry(1, 2), entry(1, 3)]).unwrap(),
        );
        let core = LogCore::new(persisted.clone());

        core.remove_back_and_insert_async(LogIndex::new(2), vec![entry(2, 2)], true)
            .await
            .unwrap();

        let terms: Vec<u64> = persisted.entries().iter().map(|e| e.term().as_u64()).collect();
        assert_eq!(terms, vec![1, 2]);
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let persisted = Arc::new(InMemoryPersistedLog::new(LogId(1)));
        let core = LogCore::new(persisted.clone());
        persisted.set_fail_writes(true);

        let res = core.insert_async(vec![entry(1, 1)], false).await;
        assert!(matches!(res, Err(LogCoreError::Persisted(PersistedLogError::Io(_)))));

        let persisted_log = core.release_persisted_log();
        assert_eq!(persisted_log.id(), LogId(1));
    }
}
