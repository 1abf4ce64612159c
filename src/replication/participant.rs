use crate::log_core::{LogCore, LogIndex, LogTerm, TermIndexPair};
use crate::replication::{
    AppendEntriesErrorReason, MessageId, ParticipantId, ReplicationError, WaitForResult,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::time::Duration;

/// The capability set shared by every role a replicated log participant can be in.
#[async_trait::async_trait]
pub trait LogParticipant: Send + Sync {
    async fn status(&self) -> LogStatus;

    /// Detaches the LogCore from this instance. Every later call on the instance fails.
    ///
    /// The returned `DeferredAction` fails whatever this participant still owed its callers. Run
    /// it after releasing any lock held while swapping participants.
    async fn resign(&self) -> Result<(LogCore, DeferredAction), ReplicationError>;

    /// Resolves once the commit index reaches `index`.
    async fn wait_for(&self, index: LogIndex) -> Result<WaitForResult, ReplicationError>;
}

/// A unit of cleanup to run outside of a critical section. If never fired explicitly, it fires on
/// drop, so owed promises can't be leaked silently.
#[must_use]
pub struct DeferredAction {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl DeferredAction {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        DeferredAction {
            action: Some(Box::new(action)),
        }
    }

    pub fn noop() -> Self {
        DeferredAction { action: None }
    }

    pub fn fire(mut self) {
        self.fire_impl();
    }

    fn fire_impl(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.fire_impl();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogStatistics {
    pub spearhead: TermIndexPair,
    pub commit_index: LogIndex,
}

#[derive(Clone, Debug)]
pub enum LogStatus {
    Unconfigured,
    Leader(LeaderStatus),
    Follower(FollowerStatus),
}

#[derive(Clone, Debug)]
pub struct LeaderStatus {
    pub local: LogStatistics,
    pub term: LogTerm,
    pub largest_common_index: LogIndex,
    pub release_index: LogIndex,
    pub follower: BTreeMap<ParticipantId, FollowerStatistics>,
}

#[derive(Clone, Debug)]
pub struct FollowerStatistics {
    pub last_acked_entry: TermIndexPair,
    pub commit_index: LogIndex,
    pub largest_common_index: LogIndex,
    pub state: FollowerReplicationState,
    pub num_errors: usize,
    pub last_error_reason: AppendEntriesErrorReason,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_request_latency: Option<Duration>,
}

/// Public view of a leader's per-follower replication state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FollowerReplicationState {
    Idle,
    Preparing,
    InFlight,
    ErrorBackoff { remaining: Duration },
}

#[derive(Clone, Debug)]
pub struct FollowerStatus {
    pub local: LogStatistics,
    pub leader: ParticipantId,
    pub term: LogTerm,
    pub largest_common_index: LogIndex,
    pub last_recv_message_id: MessageId,
}
