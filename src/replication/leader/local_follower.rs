use crate::log_core::{LogCore, LogCoreError, LogIndex, LogTerm};
use crate::replication::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, AppendEntriesRpcError,
    ParticipantId, ReplicationError,
};
use std::future::Future;
use std::sync::Mutex;

/// LocalFollower makes the leader's own physical log a follower like any other, so it is
/// replicated to and counted toward the quorum the same way.
///
/// It trusts the leader completely: no validation, it only persists.
pub(super) struct LocalFollower {
    logger: slog::Logger,
    participant_id: ParticipantId,
    term: LogTerm,
    log_core: Mutex<Option<LogCore>>,
}

impl LocalFollower {
    pub(super) fn new(logger: slog::Logger, participant_id: ParticipantId, term: LogTerm, log_core: LogCore) -> Self {
        LocalFollower {
            logger,
            participant_id,
            term,
            log_core: Mutex::new(Some(log_core)),
        }
    }

    /// Takes the LogCore away. Outstanding writes still land, later requests fail with
    /// `LostLogCore`.
    pub(super) fn resign(&self) -> Option<LogCore> {
        self.log_core
            .lock()
            .expect("LocalFollower mutex guard poison")
            .take()
    }

    /// Starts discarding every physical entry `< stop`. `None` if the core is already gone.
    pub(super) fn remove_front(
        &self,
        stop: LogIndex,
    ) -> Option<impl Future<Output = Result<(), LogCoreError>> + Send + 'static> {
        self.log_core
            .lock()
            .expect("LocalFollower mutex guard poison")
            .as_ref()
            .map(|log_core| log_core.remove_front_async(stop))
    }
}

#[async_trait::async_trait]
impl AbstractFollower for LocalFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesRpcError> {
        let AppendEntriesRequest {
            message_id,
            entries,
            wait_for_sync,
            ..
        } = request;

        let write = {
            let guard = self.log_core.lock().expect("LocalFollower mutex guard poison");
            let log_core = match guard.as_ref() {
                Some(log_core) => log_core,
                None => {
                    return Ok(AppendEntriesResult::rejected(
                        self.term,
                        AppendEntriesErrorReason::LostLogCore,
                        message_id,
                    ))
                }
            };

            // Rewriting from the first entry on keeps a retry after a lost response idempotent.
            let start = entries.first().map(|first| first.index());
            start.map(|start| log_core.remove_back_and_insert_async(start, entries, wait_for_sync))
        };

        if let Some(write) = write {
            write.await.map_err(|e| {
                slog::error!(self.logger, "Local write failed: {}", e);
                AppendEntriesRpcError::Remote(ReplicationError::LogCore(e))
            })?;
        }

        Ok(AppendEntriesResult::ok(self.term, message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_core::{InMemoryPersistedLog, LogEntry, LogId, LogPayload, TermIndexPair};
    use crate::replication::MessageId;
    use crate::test_utils;
    use std::sync::Arc;

    fn request(message_id: u64, entries: Vec<LogEntry>) -> AppendEntriesRequest {
        AppendEntriesRequest {
            leader_term: LogTerm::new(1),
            leader_id: ParticipantId::new("me"),
            prev_log_entry: TermIndexPair::default(),
            leader_commit: LogIndex::zero(),
            largest_common_index: LogIndex::zero(),
            message_id: MessageId::new(message_id),
            wait_for_sync: false,
            entries,
        }
    }

    fn entry(index: u64) -> LogEntry {
        LogEntry::new(LogTerm::new(1), LogIndex::new(index), Some(LogPayload::from("p")))
    }

    #[tokio::test]
    async fn persists_and_survives_retries() {
        let persisted = Arc::new(InMemoryPersistedLog::new(LogId(1)));
        let local = LocalFollower::new(
            test_utils::discard_logger(),
            ParticipantId::new("me"),
            LogTerm::new(1),
            LogCore::new(persisted.clone()),
        );

        let result = local.append_entries(request(1, vec![entry(1), entry(2)])).await.unwrap();
        assert!(result.is_success());

        // Same range again, e.g. after the leader timed out waiting.
        let result = local.append_entries(request(2, vec![entry(1), entry(2)])).await.unwrap();
        assert!(result.is_success());
        assert_eq!(persisted.entries().len(), 2);

        local.remove_front(LogIndex::new(2)).unwrap().await.unwrap();
        assert_eq!(persisted.entries()[0].index(), LogIndex::new(2));

        assert!(local.resign().is_some());
        assert!(local.remove_front(LogIndex::new(3)).is_none());
        let result = local.append_entries(request(3, vec![entry(3)])).await.unwrap();
        assert_eq!(result.reason, AppendEntriesErrorReason::LostLogCore);
    }

    #[tokio::test]
    async fn storage_errors_are_reported() {
        let persisted = Arc::new(InMemoryPersistedLog::new(LogId(1)));
        let local = LocalFollower::new(
            test_utils::discard_logger(),
            ParticipantId::new("me"),
            LogTerm::new(1),
            LogCore::new(persisted.clone()),
        );
        persisted.set_fail_writes(true);

        let result = local.append_entries(request(1, vec![entry(1)])).await;
        assert!(matches!(
            result,
            Err(AppendEntriesRpcError::Remote(ReplicationError::LogCore(_)))
        ));
    }
}
