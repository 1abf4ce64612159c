use crate::api::options::ReplicationOptionsValidated;
use crate::api::replicated_log::ReplicatedLog;
use crate::log_core::LogCore;
use crate::replication::RealClock;
use crate::ReplicationOptions;
use std::convert::TryFrom;

pub struct ReplicatedLogConfig {
    pub logger: slog::Logger,
    // The log is owned by the created ReplicatedLog from here on.
    pub log_core: LogCore,
    pub options: ReplicationOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicatedLogCreationError {
    #[error("Illegal options for configuring replicated log: {0}")]
    IllegalOptions(String),
}

/// Creates a replicated log with an unconfigured participant. Call `become_leader` or
/// `become_follower` to give it a role.
pub fn try_create_replicated_log(config: ReplicatedLogConfig) -> Result<ReplicatedLog, ReplicatedLogCreationError> {
    let options = ReplicationOptionsValidated::try_from(config.options)
        .map_err(|e| ReplicatedLogCreationError::IllegalOptions(e.to_string()))?;

    let log = ReplicatedLog::new(config.logger, config.log_core, options, RealClock);
    Ok(log)
}
