use crate::replication::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, AppendEntriesResult, AppendEntriesRpcError,
    LogFollower, ParticipantId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

type Reply = Result<AppendEntriesResult, AppendEntriesRpcError>;

/// A follower whose replies are decided by the test, one request at a time.
pub(crate) struct ScriptedFollower {
    participant_id: ParticipantId,
    requests_tx: mpsc::UnboundedSender<PendingAppendEntries>,
}

impl ScriptedFollower {
    pub(crate) fn new(id: &str) -> (Arc<ScriptedFollower>, ScriptedFollowerController) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let follower = ScriptedFollower {
            participant_id: ParticipantId::new(id),
            requests_tx,
        };

        (Arc::new(follower), ScriptedFollowerController { requests_rx })
    }
}

#[async_trait::async_trait]
impl AbstractFollower for ScriptedFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesRpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests_tx
            .send(PendingAppendEntries { request, reply_tx })
            .map_err(|_| AppendEntriesRpcError::Transport("controller dropped".into()))?;

        reply_rx
            .await
            .unwrap_or_else(|_| Err(AppendEntriesRpcError::Transport("request dropped without reply".into())))
    }
}

pub(crate) struct ScriptedFollowerController {
    requests_rx: mpsc::UnboundedReceiver<PendingAppendEntries>,
}

impl ScriptedFollowerController {
    pub(crate) async fn next_request(&mut self) -> PendingAppendEntries {
        tokio::time::timeout(Duration::from_secs(5), self.requests_rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected request")
    }
}

pub(crate) struct PendingAppendEntries {
    pub(crate) request: AppendEntriesRequest,
    reply_tx: oneshot::Sender<Reply>,
}

impl PendingAppendEntries {
    pub(crate) fn respond_ok(self) {
        let result = AppendEntriesResult::ok(self.request.leader_term, self.request.message_id);
        let _ = self.reply_tx.send(Ok(result));
    }

    pub(crate) fn reject(self, reason: AppendEntriesErrorReason) {
        let result = AppendEntriesResult::rejected(self.request.leader_term, reason, self.request.message_id);
        let _ = self.reply_tx.send(Ok(result));
    }

    pub(crate) fn fail(self, error: AppendEntriesRpcError) {
        let _ = self.reply_tx.send(Err(error));
    }
}

/// Calls straight into a `LogFollower`, no transport in between.
pub(crate) struct LoopbackFollower {
    follower: Arc<LogFollower>,
}

impl LoopbackFollower {
    pub(crate) fn new(follower: Arc<LogFollower>) -> Self {
        LoopbackFollower { follower }
    }
}

#[async_trait::async_trait]
impl AbstractFollower for LoopbackFollower {
    fn participant_id(&self) -> &ParticipantId {
        self.follower.participant_id()
    }

    async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResult, AppendEntriesRpcError> {
        Ok(self.follower.append_entries(request).await?)
    }
}
