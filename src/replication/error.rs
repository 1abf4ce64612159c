use crate::log_core::LogCoreError;
use crate::replication::ParticipantId;

/// Failures surfaced at a participant's call boundary. Routine replication outcomes are not
/// errors; see `AppendEntriesErrorReason`.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("Active participant is not the leader")]
    NotTheLeader,
    #[error("Active participant is not a follower")]
    NotTheFollower,
    #[error("Participant has resigned")]
    ParticipantResigned,
    #[error("Participant is unconfigured")]
    ParticipantUnconfigured,
    #[error("Replicated log has been dropped")]
    LogDropped,
    #[error("Write concern {write_concern} can't be met by {participants} participants")]
    InvalidWriteConcern { write_concern: usize, participants: usize },
    #[error("Participant {0} appears more than once")]
    DuplicateParticipant(ParticipantId),
    #[error("Log core failure: {0}")]
    LogCore(#[from] LogCoreError),
}
