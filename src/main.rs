use replicated_log::{
    AbstractFollower, InMemoryPersistedLog, LogCore, LogId, LogParticipant, LogPayload, LogTerm, ParticipantId,
    ReplicatedLog, ReplicatedLogConfig, ReplicatedLogFollowerProxy, ReplicationOptions,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;

// Runs a three participant log in one process: replicate under one leader, hand leadership to
// another participant, replicate again.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let ids = ["n1", "n2", "n3"];

    let mut logs = Vec::with_capacity(ids.len());
    for id in ids.iter() {
        let config = ReplicatedLogConfig {
            logger: logger.new(slog::o!("ParticipantId" => *id)),
            log_core: LogCore::new(Arc::new(InMemoryPersistedLog::new(LogId(1)))),
            options: ReplicationOptions::default(),
        };
        logs.push(Arc::new(replicated_log::try_create_replicated_log(config)?));
    }

    replicate_under(&logger, &logs, &ids, 0, LogTerm::new(1), &["hello", "world"]).await?;
    replicate_under(&logger, &logs, &ids, 1, LogTerm::new(2), &["after", "failover"]).await?;

    for (id, log) in ids.iter().zip(logs.iter()) {
        let status = log.get_status().await?;
        slog::info!(logger, "Final status of {}: {:?}", id, status);
    }

    Ok(())
}

async fn replicate_under(
    logger: &slog::Logger,
    logs: &[Arc<ReplicatedLog>],
    ids: &[&str],
    leader_pos: usize,
    term: LogTerm,
    payloads: &[&'static str],
) -> Result<(), Box<dyn Error>> {
    let leader_id = ParticipantId::new(ids[leader_pos]);

    // Followers first, so the new leader's first requests are not rejected.
    let mut followers: Vec<Arc<dyn AbstractFollower>> = Vec::new();
    for (pos, log) in logs.iter().enumerate() {
        if pos == leader_pos {
            continue;
        }
        let id = ParticipantId::new(ids[pos]);
        log.become_follower(id.clone(), term, leader_id.clone()).await?;
        followers.push(Arc::new(ReplicatedLogFollowerProxy::new(id, log.clone())));
    }

    let write_concern = logs.len() / 2 + 1;
    let leader = logs[leader_pos]
        .become_leader(leader_id.clone(), term, followers, write_concern)
        .await?;
    slog::info!(logger, "{} leads term {}", leader_id, term);

    for payload in payloads {
        let index = leader.insert(LogPayload::from(*payload), false)?;
        let result = leader.wait_for(index).await?;
        slog::info!(
            logger,
            "Committed {:?} at {}, commit index now {}",
            payload,
            index,
            result.current_commit_index
        );
    }

    Ok(())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
