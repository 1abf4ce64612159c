mod follower_info;
mod leader;
mod local_follower;

pub use leader::LogLeader;

pub(crate) use leader::validate_participants;
pub(crate) use leader::LogLeaderConfig;
