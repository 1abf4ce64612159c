use crate::log_core::{LogCore, LogIndex, LogTerm};
use crate::replication::in_memory_log::{InMemoryLog, InMemoryLogEntry};
use crate::replication::wait_for::{self, ResolvablePromises, WaitForQueue};
use crate::replication::{
    AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, DeferredAction, FollowerStatus,
    LogParticipant, LogStatistics, LogStatus, MessageId, ParticipantId, ReplicationError, WaitForResult,
};
use std::cmp;
use tokio::sync::Mutex;

/// LogFollower validates and applies AppendEntries requests from one leader in one term.
///
/// `participant_id`, `leader_id` and `current_term` are fixed for the lifetime of the instance. A
/// new term always means a new LogFollower.
pub struct LogFollower {
    logger: slog::Logger,
    participant_id: ParticipantId,
    leader_id: ParticipantId,
    current_term: LogTerm,
    // Held across the physical write so that requests apply strictly in message order.
    guarded: Mutex<GuardedFollowerData>,
}

struct GuardedFollowerData {
    log_core: Option<LogCore>,
    in_memory_log: InMemoryLog,
    wait_for_queue: WaitForQueue,
    commit_index: LogIndex,
    largest_common_index: LogIndex,
    last_recv_message_id: MessageId,
}

impl LogFollower {
    pub(crate) fn new(
        logger: slog::Logger,
        participant_id: ParticipantId,
        current_term: LogTerm,
        leader_id: ParticipantId,
        log_core: LogCore,
        in_memory_log: InMemoryLog,
    ) -> Self {
        let logger = logger.new(slog::o!(
            "Role" => "Follower",
            "ParticipantId" => participant_id.to_string(),
            "Term" => current_term.as_u64(),
            "Leader" => leader_id.to_string(),
        ));
        slog::info!(
            logger,
            "Became follower. Local spearhead is {:?}",
            in_memory_log.last_entry()
        );

        LogFollower {
            logger,
            participant_id,
            leader_id,
            current_term,
            guarded: Mutex::new(GuardedFollowerData {
                log_core: Some(log_core),
                in_memory_log,
                wait_for_queue: WaitForQueue::new(),
                commit_index: LogIndex::zero(),
                largest_common_index: LogIndex::zero(),
                last_recv_message_id: MessageId::default(),
            }),
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn leader_id(&self) -> &ParticipantId {
        &self.leader_id
    }

    pub fn term(&self) -> LogTerm {
        self.current_term
    }

    pub async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, ReplicationError> {
        let logger = self
            .logger
            .new(slog::o!("MessageId" => request.message_id.as_u64()));
        slog::debug!(
            logger,
            "AppendEntries prev={:?} commit={} entries={}",
            request.prev_log_entry,
            request.leader_commit,
            request.entries.len()
        );

        let mut guard = self.guarded.lock().await;
        let data = &mut *guard;

        if let Some(reason) = self.validate(data, &request) {
            slog::info!(logger, "Rejecting AppendEntries: {}", reason);
            return Ok(AppendEntriesResult::rejected(self.current_term, reason, request.message_id));
        }

        // > If an existing entry conflicts with a new one (same index but different terms),
        // > delete the existing entry and all that follow it. Append any new entries not
        // > already in the log.
        let num_matching = request
            .entries
            .iter()
            .take_while(|e| data.in_memory_log.term_at(e.index()) == Some(e.term()))
            .count();
        let new_entries = &request.entries[num_matching..];

        if let Some(first_new) = new_entries.first() {
            let start = first_new.index();
            if start <= data.commit_index {
                // Should be impossible with a correct leader. Refuse rather than lose committed data.
                slog::error!(
                    logger,
                    "Leader tried to overwrite committed index {} (commit index {})",
                    start,
                    data.commit_index
                );
                return Ok(AppendEntriesResult::rejected(
                    self.current_term,
                    AppendEntriesErrorReason::NoPrevLogMatch,
                    request.message_id,
                ));
            }

            let log_core = match data.log_core.as_ref() {
                Some(log_core) => log_core,
                None => {
                    return Ok(AppendEntriesResult::rejected(
                        self.current_term,
                        AppendEntriesErrorReason::LostLogCore,
                        request.message_id,
                    ))
                }
            };

            let write = log_core.remove_back_and_insert_async(start, new_entries.to_vec(), request.wait_for_sync);
            if let Err(e) = write.await {
                slog::error!(logger, "Failed to persist entries starting at {}: {}", start, e);
                // The physical tail from `start` may already be gone. It is above the commit
                // index, so the leader resends it.
                data.in_memory_log.truncate(start);
                return Err(ReplicationError::LogCore(e));
            }

            data.in_memory_log.truncate(start);
            for entry in new_entries {
                data.in_memory_log.append(InMemoryLogEntry {
                    entry: entry.clone(),
                    wait_for_sync: request.wait_for_sync,
                });
            }
        }

        data.last_recv_message_id = request.message_id;

        // > If leaderCommit > commitIndex, set commitIndex =
        // > min(leaderCommit, index of last new entry)
        let new_commit_index = cmp::min(request.leader_commit, request.last_entry().index);
        let resolvable = if new_commit_index > data.commit_index {
            slog::debug!(logger, "Commit index advanced {} -> {}", data.commit_index, new_commit_index);
            data.commit_index = new_commit_index;
            data.wait_for_queue.split_off_resolvable(new_commit_index)
        } else {
            ResolvablePromises::empty()
        };
        data.largest_common_index = cmp::max(data.largest_common_index, request.largest_common_index);

        let commit_index = data.commit_index;
        drop(guard);

        if !resolvable.is_empty() {
            resolvable.resolve(WaitForResult {
                current_commit_index: commit_index,
                quorum: None,
            });
        }

        Ok(AppendEntriesResult::ok(self.current_term, request.message_id))
    }

    // First failing check wins.
    fn validate(&self, data: &GuardedFollowerData, request: &AppendEntriesRequest) -> Option<AppendEntriesErrorReason> {
        if data.log_core.is_none() {
            return Some(AppendEntriesErrorReason::LostLogCore);
        }
        if request.message_id <= data.last_recv_message_id {
            return Some(AppendEntriesErrorReason::MessageOutdated);
        }
        if request.leader_id != self.leader_id {
            return Some(AppendEntriesErrorReason::InvalidLeaderId);
        }
        if request.leader_term != self.current_term {
            return Some(AppendEntriesErrorReason::WrongTerm);
        }

        // > Reply false if log doesn't contain an entry at prevLogIndex whose term matches
        // > prevLogTerm
        let prev = request.prev_log_entry;
        if prev.index > LogIndex::zero() && data.in_memory_log.term_at(prev.index) != Some(prev.term) {
            return Some(AppendEntriesErrorReason::NoPrevLogMatch);
        }

        None
    }
}

#[async_trait::async_trait]
impl LogParticipant for LogFollower {
    async fn status(&self) -> LogStatus {
        let data = self.guarded.lock().await;
        LogStatus::Follower(FollowerStatus {
            local: LogStatistics {
                spearhead: data.in_memory_log.last_entry(),
                commit_index: data.commit_index,
            },
            leader: self.leader_id.clone(),
            term: self.current_term,
            largest_common_index: data.largest_common_index,
            last_recv_message_id: data.last_recv_message_id,
        })
    }

    async fn resign(&self) -> Result<(LogCore, DeferredAction), ReplicationError> {
        let mut data = self.guarded.lock().await;
        let log_core = data.log_core.take().ok_or(ReplicationError::ParticipantResigned)?;
        let waiters = data.wait_for_queue.take_all();
        drop(data);

        slog::info!(self.logger, "Resigned. Failing {} pending waiters.", waiters.len());
        let action = DeferredAction::new(move || wait_for::fail_resigned(waiters));

        Ok((log_core, action))
    }

    async fn wait_for(&self, index: LogIndex) -> Result<WaitForResult, ReplicationError> {
        let mut data = self.guarded.lock().await;
        if data.log_core.is_none() {
            return Err(ReplicationError::ParticipantResigned);
        }
        if data.commit_index >= index {
            return Ok(WaitForResult {
                current_commit_index: data.commit_index,
                quorum: None,
            });
        }

        let promise = data.wait_for_queue.register(index);
        drop(data);

        promise.wait().await
    }
}
