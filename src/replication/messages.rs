use crate::log_core::{LogEntry, LogIndex, LogTerm, TermIndexPair};
use crate::replication::{MessageId, ParticipantId, ReplicationError};
use std::fmt;
use tokio::time::Duration;

#[derive(Clone, Debug)]
pub struct AppendEntriesRequest {
    pub leader_term: LogTerm,
    pub leader_id: ParticipantId,
    // "Previous log entry" is the entry immediately preceding `entries`. Index 0 means `entries`
    // starts at the beginning of the log.
    pub prev_log_entry: TermIndexPair,
    pub leader_commit: LogIndex,
    pub largest_common_index: LogIndex,
    pub message_id: MessageId,
    pub wait_for_sync: bool,
    pub entries: Vec<LogEntry>,
}

impl AppendEntriesRequest {
    /// Position of the last entry this request would leave on the follower.
    pub fn last_entry(&self) -> TermIndexPair {
        self.entries
            .last()
            .map(|e| e.term_index_pair())
            .unwrap_or(self.prev_log_entry)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AppendEntriesErrorCode {
    Ok,
    AppendEntriesRejected,
}

/// Why a follower did not accept an AppendEntries request. These are routine protocol outcomes;
/// the leader reacts to them programmatically.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AppendEntriesErrorReason {
    None,
    InvalidLeaderId,
    LostLogCore,
    MessageOutdated,
    WrongTerm,
    NoPrevLogMatch,
    PersistenceFailure,
    CommunicationError,
    PrevLogUnavailable,
}

impl fmt::Display for AppendEntriesErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppendEntriesErrorReason::None => "none",
            AppendEntriesErrorReason::InvalidLeaderId => "leader id is not the expected leader",
            AppendEntriesErrorReason::LostLogCore => "follower lost its log core",
            AppendEntriesErrorReason::MessageOutdated => "message id is outdated",
            AppendEntriesErrorReason::WrongTerm => "term does not match",
            AppendEntriesErrorReason::NoPrevLogMatch => "previous log entry does not match",
            AppendEntriesErrorReason::PersistenceFailure => "failed to persist entries",
            AppendEntriesErrorReason::CommunicationError => "communication with follower failed",
            AppendEntriesErrorReason::PrevLogUnavailable => "entries required by follower are no longer available",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesResult {
    pub log_term: LogTerm,
    pub error_code: AppendEntriesErrorCode,
    pub reason: AppendEntriesErrorReason,
    pub message_id: MessageId,
}

impl AppendEntriesResult {
    pub fn ok(log_term: LogTerm, message_id: MessageId) -> Self {
        AppendEntriesResult {
            log_term,
            error_code: AppendEntriesErrorCode::Ok,
            reason: AppendEntriesErrorReason::None,
            message_id,
        }
    }

    pub fn rejected(log_term: LogTerm, reason: AppendEntriesErrorReason, message_id: MessageId) -> Self {
        AppendEntriesResult {
            log_term,
            error_code: AppendEntriesErrorCode::AppendEntriesRejected,
            reason,
            message_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == AppendEntriesErrorCode::Ok
    }
}

/// A request that never produced an `AppendEntriesResult`.
#[derive(Debug, thiserror::Error)]
pub enum AppendEntriesRpcError {
    #[error("AppendEntries timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Follower failed the request: {0}")]
    Remote(#[from] ReplicationError),
}
