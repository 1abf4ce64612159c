use crate::log_core::{LogIndex, LogTerm};
use crate::replication::{ParticipantId, ReplicationError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Snapshot of the quorum that committed an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumData {
    pub index: LogIndex,
    pub term: LogTerm,
    pub quorum: Vec<ParticipantId>,
}

#[derive(Clone, Debug)]
pub struct WaitForResult {
    /// Commit index at the time the waiter was released. Always `>=` the awaited index.
    pub current_commit_index: LogIndex,
    /// Only known on the leader.
    pub quorum: Option<Arc<QuorumData>>,
}

type WaitForSender = oneshot::Sender<Result<WaitForResult, ReplicationError>>;

/// WaitForQueue is an ordered multimap from awaited index to the promises waiting on it.
#[derive(Default)]
pub(crate) struct WaitForQueue {
    waiters: BTreeMap<LogIndex, Vec<WaitForSender>>,
}

impl WaitForQueue {
    pub(crate) fn new() -> Self {
        WaitForQueue {
            waiters: BTreeMap::new(),
        }
    }

    pub(crate) fn register(&mut self, index: LogIndex) -> WaitForPromise {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(index).or_insert_with(Vec::new).push(tx);
        WaitForPromise { receiver: rx }
    }

    /// Removes every waiter with key `<= commit_index`, to be resolved once the caller has
    /// released its lock.
    pub(crate) fn split_off_resolvable(&mut self, commit_index: LogIndex) -> ResolvablePromises {
        let pending = self.waiters.split_off(&commit_index.plus(1));
        let resolvable = std::mem::replace(&mut self.waiters, pending);

        ResolvablePromises {
            senders: resolvable.into_values().flatten().collect(),
        }
    }

    /// Removes every waiter. Used when the owning participant resigns.
    pub(crate) fn take_all(&mut self) -> Vec<WaitForSender> {
        std::mem::take(&mut self.waiters).into_values().flatten().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.values().map(|v| v.len()).sum()
    }
}

#[must_use]
pub(crate) struct ResolvablePromises {
    senders: Vec<WaitForSender>,
}

impl ResolvablePromises {
    pub(crate) fn empty() -> Self {
        ResolvablePromises { senders: Vec::new() }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub(crate) fn resolve(self, result: WaitForResult) {
        for sender in self.senders {
            // The waiter may have given up; that's fine.
            let _ = sender.send(Ok(result.clone()));
        }
    }
}

/// Fails every promise with `ParticipantResigned`.
pub(crate) fn fail_resigned(senders: Vec<WaitForSender>) {
    for sender in senders {
        let _ = sender.send(Err(ReplicationError::ParticipantResigned));
    }
}

/// The receiving half of a waiter registered in a `WaitForQueue`.
pub(crate) struct WaitForPromise {
    receiver: oneshot::Receiver<Result<WaitForResult, ReplicationError>>,
}

impl WaitForPromise {
    pub(crate) async fn wait(self) -> Result<WaitForResult, ReplicationError> {
        match self.receiver.await {
            Ok(result) => result,
            // The queue was dropped without resolving us. Only happens when the participant is gone.
            Err(_) => Err(ReplicationError::ParticipantResigned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(commit: u64) -> WaitForResult {
        WaitForResult {
            current_commit_index: LogIndex::new(commit),
            quorum: None,
        }
    }

    #[tokio::test]
    async fn resolves_only_up_to_commit_index() {
        let mut queue = WaitForQueue::new();
        let w2 = queue.register(LogIndex::new(2));
        let w2_again = queue.register(LogIndex::new(2));
        let w3 = queue.register(LogIndex::new(3));
        let w5 = queue.register(LogIndex::new(5));

        let resolvable = queue.split_off_resolvable(LogIndex::new(3));
        resolvable.resolve(result(3));

        assert_eq!(w2.wait().await.unwrap().current_commit_index, LogIndex::new(3));
        assert_eq!(w2_again.wait().await.unwrap().current_commit_index, LogIndex::new(3));
        assert_eq!(w3.wait().await.unwrap().current_commit_index, LogIndex::new(3));
        assert_eq!(queue.len(), 1);

        fail_resigned(queue.take_all());
        assert!(matches!(w5.wait().await, Err(ReplicationError::ParticipantResigned)));
    }

    #[tokio::test]
    async fn dropped_queue_reports_resigned() {
        let mut queue = WaitForQueue::new();
        let waiter = queue.register(LogIndex::new(1));
        drop(queue);

        assert!(matches!(waiter.wait().await, Err(ReplicationError::ParticipantResigned)));
    }
}
