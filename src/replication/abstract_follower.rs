use crate::replication::{AppendEntriesRequest, AppendEntriesResult, AppendEntriesRpcError, ParticipantId};

/// AbstractFollower is the leader's handle on one follower.
///
/// Remote followers are implemented by a transport layer. The leader's own copy of the log is an
/// in-process `LocalFollower`, so both count toward the quorum the same way.
#[async_trait::async_trait]
pub trait AbstractFollower: Send + Sync {
    fn participant_id(&self) -> &ParticipantId;

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesRpcError>;
}
