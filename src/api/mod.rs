//! This mod holds the library's client-facing API: the `ReplicatedLog` container and how to
//! create and connect one.
mod follower_proxy;
mod options;
mod replicated_log;
mod wiring;

pub use follower_proxy::ReplicatedLogFollowerProxy;
pub use options::ReplicationOptions;
pub use replicated_log::ReplicatedLog;
pub use wiring::try_create_replicated_log;
pub use wiring::ReplicatedLogConfig;
pub use wiring::ReplicatedLogCreationError;

// So participants can be built with validated options.
pub(crate) use options::ReplicationOptionsValidated;
