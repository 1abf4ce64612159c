use crate::api::replicated_log::ReplicatedLog;
use crate::replication::{
    AbstractFollower, AppendEntriesRequest, AppendEntriesResult, AppendEntriesRpcError, Clock, ParticipantId,
    RealClock,
};
use std::sync::Arc;

/// Connects a leader to a `ReplicatedLog` in the same process. Each request goes to whichever
/// follower is active on the target at that moment, so the proxy survives role changes there.
pub struct ReplicatedLogFollowerProxy<C: Clock = RealClock> {
    participant_id: ParticipantId,
    target: Arc<ReplicatedLog<C>>,
}

impl<C: Clock> ReplicatedLogFollowerProxy<C> {
    pub fn new(participant_id: ParticipantId, target: Arc<ReplicatedLog<C>>) -> Self {
        ReplicatedLogFollowerProxy { participant_id, target }
    }
}

#[async_trait::async_trait]
impl<C: Clock> AbstractFollower for ReplicatedLogFollowerProxy<C> {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesRpcError> {
        // Not being a follower right now looks like an unreachable peer to the leader.
        let follower = self
            .target
            .get_follower()
            .await
            .map_err(|e| AppendEntriesRpcError::Transport(format!("{} unavailable: {}", self.participant_id, e)))?;

        Ok(follower.append_entries(request).await?)
    }
}
