use replicated_log::{
    AbstractFollower, AppendEntriesErrorReason, AppendEntriesRequest, InMemoryPersistedLog, LogCore, LogEntry, LogId,
    LogIndex, LogParticipant, LogPayload, LogStatus, LogTerm, MessageId, ParticipantId, ReplicatedLog,
    ReplicatedLogConfig, ReplicatedLogFollowerProxy, ReplicationError, ReplicationOptions, TermIndexPair,
};
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

struct Node {
    id: ParticipantId,
    persisted: Arc<InMemoryPersistedLog>,
    log: Arc<ReplicatedLog>,
}

impl Node {
    fn proxy(&self) -> Arc<dyn AbstractFollower> {
        Arc::new(ReplicatedLogFollowerProxy::new(self.id.clone(), self.log.clone()))
    }

    fn persisted_indexes(&self) -> Vec<(u64, u64)> {
        self.persisted
            .entries()
            .iter()
            .map(|e| (e.term().as_u64(), e.index().as_u64()))
            .collect()
    }
}

fn node(id: &str, persisted: InMemoryPersistedLog) -> Result<Node, Box<dyn Error>> {
    let persisted = Arc::new(persisted);
    let config = ReplicatedLogConfig {
        logger: slog::Logger::root(slog::Discard, slog::o!()),
        log_core: LogCore::new(persisted.clone()),
        options: ReplicationOptions {
            error_backoff_initial: Some(Duration::from_millis(5)),
            error_backoff_max: Some(Duration::from_millis(50)),
            ..ReplicationOptions::default()
        },
    };

    Ok(Node {
        id: ParticipantId::new(id),
        persisted,
        log: Arc::new(replicated_log::try_create_replicated_log(config)?),
    })
}

fn empty_node(id: &str) -> Result<Node, Box<dyn Error>> {
    node(id, InMemoryPersistedLog::new(LogId(7)))
}

async fn with_timeout<T>(f: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Unexpected timeout")
}

#[tokio::test]
async fn lone_leader_commits_on_its_own() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let leader = n1.log.become_leader(n1.id.clone(), LogTerm::new(1), vec![], 1).await?;

    let index = leader.insert(LogPayload::from("x"), false)?;
    leader.trigger_async_replication();
    let result = with_timeout(leader.wait_for(index)).await?;

    assert!(result.current_commit_index >= index);
    let quorum = result.quorum.expect("leader knows its quorum");
    assert_eq!(quorum.quorum, vec![n1.id.clone()]);

    Ok(())
}

#[tokio::test]
async fn commit_waits_for_follower_ack() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let n2 = empty_node("n2")?;

    // n2 is not a follower yet, so the leader's requests fail and back off.
    let leader = n1
        .log
        .become_leader(n1.id.clone(), LogTerm::new(1), vec![n2.proxy()], 2)
        .await?;
    let index = leader.insert(LogPayload::from("x"), false)?;

    let waiter = {
        let leader = leader.clone();
        tokio::spawn(async move { leader.wait_for(index).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());

    n2.log.become_follower(n2.id.clone(), LogTerm::new(1), n1.id.clone()).await?;
    let result = with_timeout(waiter).await??;

    let mut quorum = result.quorum.expect("leader knows its quorum").quorum.clone();
    quorum.sort();
    assert_eq!(quorum, vec![n1.id.clone(), n2.id.clone()]);
    assert_eq!(n2.persisted.entries().last().map(|e| e.index()), Some(index));

    Ok(())
}

#[tokio::test]
async fn mismatching_prev_entry_is_rejected() -> Result<(), Box<dyn Error>> {
    let entries = (1..=5)
        .map(|i| LogEntry::new(LogTerm::new(1), LogIndex::new(i), Some(LogPayload::from("p"))))
        .collect();
    let n2 = node("n2", InMemoryPersistedLog::with_entries(LogId(7), entries)?)?;
    let follower = n2
        .log
        .become_follower(n2.id.clone(), LogTerm::new(2), ParticipantId::new("n1"))
        .await?;

    let request = AppendEntriesRequest {
        leader_term: LogTerm::new(2),
        leader_id: ParticipantId::new("n1"),
        prev_log_entry: TermIndexPair::new(LogTerm::new(2), LogIndex::new(5)),
        leader_commit: LogIndex::new(5),
        largest_common_index: LogIndex::zero(),
        message_id: MessageId::new(1),
        wait_for_sync: false,
        entries: vec![LogEntry::new(LogTerm::new(2), LogIndex::new(6), Some(LogPayload::from("q")))],
    };
    let result = follower.append_entries(request).await?;

    assert_eq!(result.reason, AppendEntriesErrorReason::NoPrevLogMatch);
    assert_eq!(n2.persisted.entries().len(), 5);
    match n2.log.get_status().await? {
        LogStatus::Follower(status) => assert_eq!(status.local.commit_index, LogIndex::zero()),
        other => panic!("Expected follower status, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn role_change_fails_owed_promises() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let follower = n1
        .log
        .become_follower(n1.id.clone(), LogTerm::new(1), ParticipantId::new("n0"))
        .await?;

    let waiter = {
        let follower = follower.clone();
        tokio::spawn(async move { follower.wait_for(LogIndex::new(3)).await })
    };
    tokio::task::yield_now().await;

    let leader = n1.log.become_leader(n1.id.clone(), LogTerm::new(2), vec![], 1).await?;

    assert!(matches!(
        with_timeout(waiter).await?,
        Err(ReplicationError::ParticipantResigned)
    ));
    assert!(matches!(n1.log.get_follower().await, Err(ReplicationError::NotTheFollower)));
    assert!(leader.insert(LogPayload::from("x"), false).is_ok());

    Ok(())
}

#[tokio::test]
async fn new_leader_overwrites_uncommitted_suffix() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let n2 = empty_node("n2")?;
    let n3 = empty_node("n3")?;

    // n1 leads term 1 but nobody follows, so nothing it writes gets committed.
    let old_leader = n1
        .log
        .become_leader(n1.id.clone(), LogTerm::new(1), vec![n2.proxy(), n3.proxy()], 2)
        .await?;
    old_leader.insert(LogPayload::from("lost-1"), false)?;
    let lost = old_leader.insert(LogPayload::from("lost-2"), false)?;
    with_timeout(async {
        while n1.persisted.entries().last().map(|e| e.index()) != Some(lost) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // n2 takes over term 2.
    n1.log.become_follower(n1.id.clone(), LogTerm::new(2), n2.id.clone()).await?;
    n3.log.become_follower(n3.id.clone(), LogTerm::new(2), n2.id.clone()).await?;
    let leader = n2
        .log
        .become_leader(n2.id.clone(), LogTerm::new(2), vec![n1.proxy(), n3.proxy()], 2)
        .await?;

    let index = leader.insert(LogPayload::from("kept"), false)?;
    with_timeout(leader.wait_for(index)).await?;

    // Wait for every follower to converge; the write concern doesn't require n1.
    with_timeout(async {
        while n1.persisted_indexes() != vec![(2, 1), (2, 2)] {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let committed: Vec<LogPayload> = leader
        .wait_for_iterator(LogIndex::new(1))
        .await?
        .filter_map(|e| e.payload().cloned())
        .collect();
    assert_eq!(committed, vec![LogPayload::from("kept")]);
    assert!(matches!(
        old_leader.insert(LogPayload::from("late"), false),
        Err(ReplicationError::ParticipantResigned)
    ));

    Ok(())
}

#[tokio::test]
async fn compacted_leader_catches_up_follower_after_role_change() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let n2 = empty_node("n2")?;
    let n3 = empty_node("n3")?;

    // Term 1: everybody acks up to 4, so n1 may compact everything before it.
    n2.log.become_follower(n2.id.clone(), LogTerm::new(1), n1.id.clone()).await?;
    n3.log.become_follower(n3.id.clone(), LogTerm::new(1), n1.id.clone()).await?;
    let leader = n1
        .log
        .become_leader(n1.id.clone(), LogTerm::new(1), vec![n2.proxy(), n3.proxy()], 2)
        .await?;
    for payload in ["a", "b", "c"] {
        leader.insert(LogPayload::from(payload), false)?;
    }
    with_timeout(async {
        loop {
            match n1.log.get_status().await {
                Ok(LogStatus::Leader(status)) if status.largest_common_index >= LogIndex::new(4) => break,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    })
    .await;
    leader.release(LogIndex::new(4))?;
    with_timeout(async {
        while n1.persisted.entries().first().map(|e| e.index()) != Some(LogIndex::new(4)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // n3 stops listening to n1 and misses 5 and 6.
    n3.log
        .become_follower(n3.id.clone(), LogTerm::new(1), ParticipantId::new("n0"))
        .await?;
    leader.insert(LogPayload::from("d"), false)?;
    let missed = leader.insert(LogPayload::from("e"), false)?;
    with_timeout(leader.wait_for(missed)).await?;

    // Term 2: n1 leads again from its compacted log and needs n3 to commit anything.
    n2.log.become_follower(n2.id.clone(), LogTerm::new(2), n1.id.clone()).await?;
    n3.log.become_follower(n3.id.clone(), LogTerm::new(2), n1.id.clone()).await?;
    let leader = n1
        .log
        .become_leader(n1.id.clone(), LogTerm::new(2), vec![n2.proxy(), n3.proxy()], 3)
        .await?;
    assert_eq!(n1.persisted.entries()[0].index(), LogIndex::new(4));

    let result = with_timeout(leader.wait_for(LogIndex::new(7))).await?;
    assert_eq!(result.current_commit_index, LogIndex::new(7));
    assert_eq!(
        n3.persisted_indexes(),
        vec![(1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 6), (2, 7)]
    );

    Ok(())
}

#[tokio::test]
async fn dropped_log_hands_back_core() -> Result<(), Box<dyn Error>> {
    let n1 = empty_node("n1")?;
    let leader = n1.log.become_leader(n1.id.clone(), LogTerm::new(1), vec![], 1).await?;
    let index = leader.insert(LogPayload::from("x"), true)?;
    with_timeout(leader.wait_for(index)).await?;

    let log_core = n1.log.drop_participant().await?;
    assert_eq!(log_core.log_id(), LogId(7));
    assert!(matches!(n1.log.get_status().await, Err(ReplicationError::LogDropped)));

    // The core can be handed to a new container.
    let config = ReplicatedLogConfig {
        logger: slog::Logger::root(slog::Discard, slog::o!()),
        log_core,
        options: ReplicationOptions::default(),
    };
    let reopened = replicated_log::try_create_replicated_log(config)?;
    let leader = reopened.become_leader(n1.id.clone(), LogTerm::new(2), vec![], 1).await?;
    let index = leader.insert(LogPayload::from("y"), false)?;
    assert_eq!(index, LogIndex::new(4));

    Ok(())
}
