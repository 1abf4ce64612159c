//! The replication protocol: the three participant roles (unconfigured, leader, follower), the
//! AppendEntries messages they exchange, and the waitFor promises handed to callers.
mod abstract_follower;
mod error;
mod follower;
mod in_memory_log;
mod leader;
mod messages;
mod participant;
mod peers;
mod time;
mod unconfigured;
mod wait_for;

pub use abstract_follower::AbstractFollower;
pub use error::ReplicationError;
pub use follower::LogFollower;
pub use leader::LogLeader;
pub use messages::AppendEntriesErrorCode;
pub use messages::AppendEntriesErrorReason;
pub use messages::AppendEntriesRequest;
pub use messages::AppendEntriesResult;
pub use messages::AppendEntriesRpcError;
pub use participant::DeferredAction;
pub use participant::FollowerReplicationState;
pub use participant::FollowerStatistics;
pub use participant::FollowerStatus;
pub use participant::LeaderStatus;
pub use participant::LogParticipant;
pub use participant::LogStatistics;
pub use participant::LogStatus;
pub use peers::MessageId;
pub use peers::ParticipantId;
pub use time::Clock;
pub use time::RealClock;
pub use unconfigured::LogUnconfigured;
pub use wait_for::QuorumData;
pub use wait_for::WaitForResult;

// So the container can build participants.
pub(crate) use in_memory_log::InMemoryLog;
pub(crate) use leader::validate_participants;
pub(crate) use leader::LogLeaderConfig;
