use crate::api::ReplicationOptionsValidated;
use crate::log_core::{LogCore, LogEntry, LogIndex, LogPayload, LogTerm};
use crate::replication::in_memory_log::{InMemoryLog, InMemoryLogEntry};
use crate::replication::leader::follower_info::{AppendEntriesDescriptor, FollowerInfo};
use crate::replication::leader::local_follower::LocalFollower;
use crate::replication::time::{Clock, RealClock};
use crate::replication::wait_for::{self, ResolvablePromises, WaitForQueue};
use crate::replication::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, AppendEntriesRpcError,
    DeferredAction, LeaderStatus, LogParticipant, LogStatistics, LogStatus, ParticipantId, QuorumData,
    ReplicationError, WaitForResult,
};
use std::cmp;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::Instant;

pub(crate) struct LogLeaderConfig<C: Clock> {
    pub logger: slog::Logger,
    pub participant_id: ParticipantId,
    pub term: LogTerm,
    pub log_core: LogCore,
    pub in_memory_log: InMemoryLog,
    pub followers: Vec<Arc<dyn AbstractFollower>>,
    pub write_concern: usize,
    pub options: ReplicationOptionsValidated,
    pub clock: C,
}

/// LogLeader accepts inserts for one term and replicates them to its followers until
/// `write_concern` participants (itself included) hold them.
pub struct LogLeader<C: Clock = RealClock> {
    logger: slog::Logger,
    participant_id: ParticipantId,
    current_term: LogTerm,
    write_concern: usize,
    options: ReplicationOptionsValidated,
    clock: C,
    local_follower: Arc<LocalFollower>,
    // Never held across an await. Replication continuations re-acquire it.
    guarded: Mutex<GuardedLeaderData>,
    // Spawned tasks only hold weak references, so they never keep a replaced leader alive.
    weak_self: Weak<LogLeader<C>>,
}

struct GuardedLeaderData {
    in_memory_log: InMemoryLog,
    follower_data: BTreeMap<ParticipantId, FollowerInfo>,
    wait_for_queue: WaitForQueue,
    commit_index: LogIndex,
    largest_common_index: LogIndex,
    release_index: LogIndex,
    // Physical entries before this index have been handed to `remove_front`.
    compacted_before: LogIndex,
    last_quorum: Option<Arc<QuorumData>>,
    did_resign: bool,
}

struct PreparedRequest {
    follower: Arc<dyn AbstractFollower>,
    request: AppendEntriesRequest,
    descriptor: AppendEntriesDescriptor,
}

/// Work decided while holding the lock, executed after releasing it.
#[derive(Default)]
struct Actions {
    requests: Vec<PreparedRequest>,
    retries: Vec<Instant>,
    resolvable: Option<(ResolvablePromises, WaitForResult)>,
    compact_before: Option<LogIndex>,
}

/// Checks that `write_concern` can be met and that every participant is distinct.
pub(crate) fn validate_participants(
    leader_id: &ParticipantId,
    followers: &[Arc<dyn AbstractFollower>],
    write_concern: usize,
) -> Result<(), ReplicationError> {
    let participants = followers.len() + 1;
    if write_concern == 0 || write_concern > participants {
        return Err(ReplicationError::InvalidWriteConcern {
            write_concern,
            participants,
        });
    }

    let mut seen = BTreeSet::new();
    seen.insert(leader_id);
    for follower in followers {
        if !seen.insert(follower.participant_id()) {
            return Err(ReplicationError::DuplicateParticipant(
                follower.participant_id().clone(),
            ));
        }
    }

    Ok(())
}

impl<C: Clock> LogLeader<C> {
    /// Does not start replicating; call `trigger_async_replication()` once installed.
    pub(crate) fn construct(config: LogLeaderConfig<C>) -> Arc<Self> {
        let LogLeaderConfig {
            logger,
            participant_id,
            term,
            log_core,
            mut in_memory_log,
            followers,
            write_concern,
            options,
            clock,
        } = config;

        let logger = logger.new(slog::o!(
            "Role" => "Leader",
            "ParticipantId" => participant_id.to_string(),
            "Term" => term.as_u64(),
        ));

        // Every follower starts at our last entry from before this term. The term won't match
        // ours, so it can't count toward a quorum until the follower acks in this term.
        let seed = in_memory_log.last_entry();

        let local_follower = Arc::new(LocalFollower::new(
            logger.new(slog::o!("Follower" => participant_id.to_string())),
            participant_id.clone(),
            term,
            log_core,
        ));

        let mut follower_data = BTreeMap::new();
        follower_data.insert(
            participant_id.clone(),
            FollowerInfo::new(local_follower.clone(), seed),
        );
        for follower in followers {
            follower_data.insert(follower.participant_id().clone(), FollowerInfo::new(follower, seed));
        }

        // Marker entry for the new term. It gives followers a position of this term to agree on
        // before any user entry exists.
        let marker_index = in_memory_log.next_index();
        in_memory_log.append(InMemoryLogEntry {
            entry: LogEntry::new(term, marker_index, None),
            wait_for_sync: false,
        });

        slog::info!(
            logger,
            "Became leader with {} followers and write concern {}. Marker at {}, previous spearhead {:?}.",
            follower_data.len() - 1,
            write_concern,
            marker_index,
            seed
        );

        Arc::new_cyclic(|weak_self| LogLeader {
            logger,
            participant_id,
            current_term: term,
            write_concern,
            options,
            clock,
            local_follower,
            guarded: Mutex::new(GuardedLeaderData {
                in_memory_log,
                follower_data,
                wait_for_queue: WaitForQueue::new(),
                commit_index: LogIndex::zero(),
                largest_common_index: LogIndex::zero(),
                release_index: LogIndex::zero(),
                compacted_before: LogIndex::zero(),
                last_quorum: None,
                did_resign: false,
            }),
            weak_self: weak_self.clone(),
        })
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn term(&self) -> LogTerm {
        self.current_term
    }

    pub fn write_concern(&self) -> usize {
        self.write_concern
    }

    /// Appends `payload` at the end of the log and starts replicating it.
    pub fn insert(&self, payload: LogPayload, wait_for_sync: bool) -> Result<LogIndex, ReplicationError> {
        let index = self.insert_without_replication(payload, wait_for_sync)?;
        self.trigger_async_replication();
        Ok(index)
    }

    /// Like `insert()`, but leaves it to the caller to `trigger_async_replication()`. Lets a
    /// caller batch several inserts into fewer requests.
    pub fn insert_without_replication(
        &self,
        payload: LogPayload,
        wait_for_sync: bool,
    ) -> Result<LogIndex, ReplicationError> {
        let mut data = self.lock();
        if data.did_resign {
            return Err(ReplicationError::ParticipantResigned);
        }

        let index = data.in_memory_log.next_index();
        data.in_memory_log.append(InMemoryLogEntry {
            entry: LogEntry::new(self.current_term, index, Some(payload)),
            wait_for_sync,
        });

        Ok(index)
    }

    /// Sends a request to every follower that is idle or done backing off.
    pub fn trigger_async_replication(&self) {
        let actions = {
            let mut guard = self.lock();
            let data = &mut *guard;
            if data.did_resign {
                return;
            }

            let now = self.clock.now();
            let ready: Vec<ParticipantId> = data
                .follower_data
                .iter()
                .filter(|(_, info)| info.is_ready(now))
                .map(|(id, _)| id.clone())
                .collect();

            let mut actions = Actions::default();
            for follower_id in ready {
                self.prepare_request(data, &follower_id, now, &mut actions);
            }
            actions
        };

        self.execute(actions);
    }

    /// Records that the caller no longer needs entries up to `done_with_index`. Entries below
    /// both this and the largest common index may be removed from the physical log.
    pub fn release(&self, done_with_index: LogIndex) -> Result<(), ReplicationError> {
        let actions = {
            let mut guard = self.lock();
            let data = &mut *guard;
            if data.did_resign {
                return Err(ReplicationError::ParticipantResigned);
            }

            // Can't be done with what isn't committed yet.
            let released = cmp::min(done_with_index, data.commit_index);
            data.release_index = cmp::max(data.release_index, released);

            Actions {
                compact_before: check_compaction(data),
                ..Actions::default()
            }
        };

        self.execute(actions);
        Ok(())
    }

    /// Waits until `index` is committed, then returns the committed entries from `index` on.
    /// Markers are skipped; if nothing but markers is committed yet, keeps waiting for the next
    /// user entry.
    pub async fn wait_for_iterator(&self, index: LogIndex) -> Result<std::vec::IntoIter<LogEntry>, ReplicationError> {
        let mut awaited = index;
        loop {
            let result = self.wait_for(awaited).await?;

            let entries: Vec<LogEntry> = {
                let data = self.lock();
                if data.did_resign {
                    return Err(ReplicationError::ParticipantResigned);
                }
                data.in_memory_log
                    .range(index, result.current_commit_index)
                    .into_iter()
                    .filter(|entry| !entry.is_marker())
                    .collect()
            };

            if !entries.is_empty() {
                return Ok(entries.into_iter());
            }
            awaited = result.current_commit_index.plus(1);
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardedLeaderData> {
        self.guarded.lock().expect("LogLeader mutex guard poison")
    }

    fn prepare_request(
        &self,
        data: &mut GuardedLeaderData,
        follower_id: &ParticipantId,
        now: Instant,
        actions: &mut Actions,
    ) {
        let info = match data.follower_data.get_mut(follower_id) {
            Some(info) => info,
            None => return,
        };

        let prev_log_entry = info.last_acked_entry;
        let start = prev_log_entry.index.plus(1);
        let entries = match data
            .in_memory_log
            .slice(start, self.options.max_entries_per_request)
        {
            Some(entries) => entries,
            None => {
                slog::error!(
                    self.logger,
                    "Follower {} needs entries from {} which are no longer available",
                    follower_id,
                    start
                );
                let until = info.record_failure(AppendEntriesErrorReason::PrevLogUnavailable, None, now, &self.options);
                actions.retries.push(until);
                return;
            }
        };

        let message_id = info.prepare();
        let wait_for_sync = entries.iter().any(|e| e.wait_for_sync);
        let entries: Vec<LogEntry> = entries.into_iter().map(|e| e.entry).collect();

        let descriptor = AppendEntriesDescriptor {
            message_id,
            prev_log_entry,
            last_entry: entries
                .last()
                .map(|e| e.term_index_pair())
                .unwrap_or(prev_log_entry),
            leader_commit: data.commit_index,
            largest_common_index: data.largest_common_index,
        };
        let request = AppendEntriesRequest {
            leader_term: self.current_term,
            leader_id: self.participant_id.clone(),
            prev_log_entry,
            leader_commit: data.commit_index,
            largest_common_index: data.largest_common_index,
            message_id,
            wait_for_sync,
            entries,
        };

        actions.requests.push(PreparedRequest {
            follower: info.follower.clone(),
            request,
            descriptor,
        });
    }

    fn execute(&self, actions: Actions) {
        if let Some((resolvable, result)) = actions.resolvable {
            resolvable.resolve(result);
        }
        for prepared in actions.requests {
            self.dispatch(prepared);
        }
        for until in actions.retries {
            self.schedule_retry(until);
        }
        if let Some(stop) = actions.compact_before {
            self.compact(stop);
        }
    }

    fn dispatch(&self, prepared: PreparedRequest) {
        let PreparedRequest {
            follower,
            request,
            descriptor,
        } = prepared;
        let follower_id = follower.participant_id().clone();
        let logger = self.logger.new(slog::o!(
            "Follower" => follower_id.to_string(),
            "MessageId" => descriptor.message_id.as_u64(),
        ));
        let weak_leader = self.weak_self.clone();
        let rpc_timeout = self.options.append_entries_timeout;

        tokio::task::spawn(async move {
            match weak_leader.upgrade() {
                Some(leader) => leader.mark_in_flight(&follower_id, &descriptor),
                None => return,
            }

            slog::debug!(
                logger,
                "AppendEntries prev={:?} entries={} commit={}",
                request.prev_log_entry,
                request.entries.len(),
                request.leader_commit
            );
            let result = match tokio::time::timeout(rpc_timeout, follower.append_entries(request)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(AppendEntriesRpcError::Timeout(rpc_timeout)),
            };
            slog::debug!(logger, "AppendEntries result: {:?}", result);

            if let Some(leader) = weak_leader.upgrade() {
                leader.handle_append_entries_response(&logger, &follower_id, descriptor, result);
            }
        });
    }

    fn mark_in_flight(&self, follower_id: &ParticipantId, descriptor: &AppendEntriesDescriptor) {
        let now = self.clock.now();
        if let Some(info) = self.lock().follower_data.get_mut(follower_id) {
            info.mark_in_flight(descriptor.message_id, now);
        }
    }

    fn handle_append_entries_response(
        &self,
        logger: &slog::Logger,
        follower_id: &ParticipantId,
        descriptor: AppendEntriesDescriptor,
        result: Result<AppendEntriesResult, AppendEntriesRpcError>,
    ) {
        let actions = {
            let mut guard = self.lock();
            let data = &mut *guard;
            if data.did_resign {
                slog::debug!(logger, "Dropping AppendEntries response, no longer leader");
                return;
            }

            let now = self.clock.now();
            let mut actions = Actions::default();

            // 1. Make sure this is the response we are waiting for.
            let info = match data.follower_data.get_mut(follower_id) {
                Some(info) => info,
                None => {
                    slog::warn!(logger, "AppendEntries response from unknown follower");
                    return;
                }
            };
            if !info.expects(descriptor.message_id) {
                slog::warn!(logger, "Dropping out of date AppendEntries response");
                return;
            }

            // 2. Update the follower's state.
            match result {
                Ok(result) if result.is_success() => {
                    info.record_success(&descriptor, now);
                }
                Ok(result) => {
                    slog::warn!(logger, "AppendEntries rejected: {}", result.reason);
                    if result.reason == AppendEntriesErrorReason::NoPrevLogMatch {
                        // Step back one whole term. Every term starts with a marker, so this
                        // reaches a common entry in at most (number of terms) attempts.
                        let prev = descriptor.prev_log_entry;
                        let term = data.in_memory_log.term_at(prev.index).unwrap_or(prev.term);
                        let mut step = data.in_memory_log.last_entry_before_term(term);
                        // A compacted front was below the LCI, so every participant holds the
                        // first entry we still have. Only fall below it if that was rejected too.
                        if let Some(first) = data.in_memory_log.first_entry() {
                            if step.index.plus(1) < first.index && first.index < prev.index {
                                step = first;
                            }
                        }
                        info.last_acked_entry = step;
                        slog::info!(logger, "Stepping back to {:?}", info.last_acked_entry);
                    }
                    let until = info.record_failure(result.reason, None, now, &self.options);
                    actions.retries.push(until);
                }
                Err(e) => {
                    slog::warn!(logger, "AppendEntries failed: {}", e);
                    let reason = match &e {
                        AppendEntriesRpcError::Remote(ReplicationError::LogCore(_)) => {
                            AppendEntriesErrorReason::PersistenceFailure
                        }
                        _ => AppendEntriesErrorReason::CommunicationError,
                    };
                    let until = info.record_failure(reason, Some(e.to_string()), now, &self.options);
                    actions.retries.push(until);
                }
            }

            // 3. Check for quorum replication and resolve what got committed.
            self.update_commit_index(data, &mut actions);

            // 4. Pipeline the next request to every idle follower that is behind.
            let spearhead = data.in_memory_log.last_index();
            let behind: Vec<ParticipantId> = data
                .follower_data
                .iter()
                .filter(|(_, info)| {
                    info.is_idle()
                        && info.has_pending_work(spearhead, data.commit_index, data.largest_common_index)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for follower_id in behind {
                self.prepare_request(data, &follower_id, now, &mut actions);
            }

            actions
        };

        self.execute(actions);
    }

    // Only acks recorded in this term count.
    fn current_term_ack(&self, info: &FollowerInfo) -> LogIndex {
        if info.last_acked_entry.term == self.current_term {
            info.last_acked_entry.index
        } else {
            LogIndex::zero()
        }
    }

    fn update_commit_index(&self, data: &mut GuardedLeaderData, actions: &mut Actions) {
        let acked: Vec<LogIndex> = data
            .follower_data
            .values()
            .map(|info| self.current_term_ack(info))
            .collect();

        let new_commit_index = quorum_commit_index(acked.clone(), self.write_concern);
        if new_commit_index > data.commit_index {
            let quorum: Vec<ParticipantId> = data
                .follower_data
                .iter()
                .filter(|(_, info)| self.current_term_ack(info) >= new_commit_index)
                .map(|(id, _)| id.clone())
                .collect();
            slog::debug!(
                self.logger,
                "Commit index advanced {} -> {} with quorum {:?}",
                data.commit_index,
                new_commit_index,
                quorum
            );

            let quorum = Arc::new(QuorumData {
                index: new_commit_index,
                term: self.current_term,
                quorum,
            });
            data.commit_index = new_commit_index;
            data.last_quorum = Some(quorum.clone());

            let resolvable = data.wait_for_queue.split_off_resolvable(new_commit_index);
            if !resolvable.is_empty() {
                actions.resolvable = Some((
                    resolvable,
                    WaitForResult {
                        current_commit_index: new_commit_index,
                        quorum: Some(quorum),
                    },
                ));
            }
        }

        // A participant that hasn't acked in this term may still hold anything, so it pins the
        // LCI at zero.
        let min_acked = acked.into_iter().min().unwrap_or_default();
        let lci = cmp::min(data.commit_index, min_acked);
        if lci > data.largest_common_index {
            data.largest_common_index = lci;
            actions.compact_before = check_compaction(data);
        }
    }

    fn schedule_retry(&self, until: Instant) {
        let weak_leader = self.weak_self.clone();
        let mut clock = self.clock.clone();

        tokio::task::spawn(async move {
            clock.sleep_until(until).await;
            if let Some(leader) = weak_leader.upgrade() {
                leader.trigger_async_replication();
            }
        });
    }

    fn compact(&self, stop: LogIndex) {
        let removal = match self.local_follower.remove_front(stop) {
            Some(removal) => removal,
            None => return,
        };
        let logger = self.logger.clone();

        tokio::task::spawn(async move {
            match removal.await {
                Ok(()) => slog::debug!(logger, "Removed physical entries before {}", stop),
                Err(e) => slog::error!(logger, "Failed to remove physical entries before {}: {}", stop, e),
            }
        });
    }
}

/// The `write_concern`-th largest acked index, i.e. the largest index held by at least
/// `write_concern` participants.
fn quorum_commit_index(mut acked_indexes: Vec<LogIndex>, write_concern: usize) -> LogIndex {
    acked_indexes.sort_unstable_by(|a, b| b.cmp(a));
    write_concern
        .checked_sub(1)
        .and_then(|i| acked_indexes.get(i).copied())
        .unwrap_or_default()
}

// Entries below `bound` are removed, the one at `bound` stays so that there's always a
// previous entry to replicate from.
fn check_compaction(data: &mut GuardedLeaderData) -> Option<LogIndex> {
    let bound = cmp::min(data.largest_common_index, data.release_index);
    if bound > data.compacted_before {
        data.compacted_before = bound;
        Some(bound)
    } else {
        None
    }
}

#[async_trait::async_trait]
impl<C: Clock> LogParticipant for LogLeader<C> {
    async fn status(&self) -> LogStatus {
        let now = self.clock.now();
        let data = self.lock();

        LogStatus::Leader(LeaderStatus {
            local: LogStatistics {
                spearhead: data.in_memory_log.last_entry(),
                commit_index: data.commit_index,
            },
            term: self.current_term,
            largest_common_index: data.largest_common_index,
            release_index: data.release_index,
            follower: data
                .follower_data
                .iter()
                .map(|(id, info)| (id.clone(), info.statistics(now)))
                .collect(),
        })
    }

    async fn resign(&self) -> Result<(LogCore, DeferredAction), ReplicationError> {
        let (log_core, waiters) = {
            let mut data = self.lock();
            if data.did_resign {
                return Err(ReplicationError::ParticipantResigned);
            }
            let log_core = self
                .local_follower
                .resign()
                .ok_or(ReplicationError::ParticipantResigned)?;

            data.did_resign = true;
            data.follower_data.clear();
            (log_core, data.wait_for_queue.take_all())
        };

        slog::info!(self.logger, "Resigned. Failing {} pending waiters.", waiters.len());
        let action = DeferredAction::new(move || wait_for::fail_resigned(waiters));

        Ok((log_core, action))
    }

    async fn wait_for(&self, index: LogIndex) -> Result<WaitForResult, ReplicationError> {
        let promise = {
            let mut data = self.lock();
            if data.did_resign {
                return Err(ReplicationError::ParticipantResigned);
            }
            if data.commit_index >= index {
                return Ok(WaitForResult {
                    current_commit_index: data.commit_index,
                    quorum: data.last_quorum.clone(),
                });
            }
            data.wait_for_queue.register(index)
        };

        promise.wait().await
    }
}
