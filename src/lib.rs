mod api;
mod log_core;
mod replication;
#[cfg(test)]
mod test_utils;

pub use api::try_create_replicated_log;
pub use api::ReplicatedLog;
pub use api::ReplicatedLogConfig;
pub use api::ReplicatedLogCreationError;
pub use api::ReplicatedLogFollowerProxy;
pub use api::ReplicationOptions;
pub use log_core::InMemoryPersistedLog;
pub use log_core::LogCore;
pub use log_core::LogCoreError;
pub use log_core::LogEntry;
pub use log_core::LogId;
pub use log_core::LogIndex;
pub use log_core::LogPayload;
pub use log_core::LogTerm;
pub use log_core::PersistedLog;
pub use log_core::PersistedLogError;
pub use log_core::PersistedLogIterator;
pub use log_core::TermIndexPair;
pub use log_core::WriteOptions;
pub use replication::AbstractFollower;
pub use replication::AppendEntriesErrorCode;
pub use replication::AppendEntriesErrorReason;
pub use replication::AppendEntriesRequest;
pub use replication::AppendEntriesResult;
pub use replication::AppendEntriesRpcError;
pub use replication::Clock;
pub use replication::DeferredAction;
pub use replication::FollowerReplicationState;
pub use replication::FollowerStatistics;
pub use replication::FollowerStatus;
pub use replication::LeaderStatus;
pub use replication::LogFollower;
pub use replication::LogLeader;
pub use replication::LogParticipant;
pub use replication::LogStatistics;
pub use replication::LogStatus;
pub use replication::LogUnconfigured;
pub use replication::MessageId;
pub use replication::ParticipantId;
pub use replication::QuorumData;
pub use replication::RealClock;
pub use replication::ReplicationError;
pub use replication::WaitForResult;

// Learning 1: `crate::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
