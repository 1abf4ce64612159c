use crate::log_core::{LogCore, LogIndex};
use crate::replication::{DeferredAction, LogParticipant, LogStatus, ReplicationError, WaitForResult};
use std::sync::Mutex;

/// LogUnconfigured keeps the LogCore safe until a role is assigned. It does nothing else.
pub struct LogUnconfigured {
    log_core: Mutex<Option<LogCore>>,
}

impl LogUnconfigured {
    pub fn new(log_core: LogCore) -> Self {
        LogUnconfigured {
            log_core: Mutex::new(Some(log_core)),
        }
    }
}

#[async_trait::async_trait]
impl LogParticipant for LogUnconfigured {
    async fn status(&self) -> LogStatus {
        LogStatus::Unconfigured
    }

    async fn resign(&self) -> Result<(LogCore, DeferredAction), ReplicationError> {
        let log_core = self
            .log_core
            .lock()
            .expect("LogUnconfigured mutex guard poison")
            .take()
            .ok_or(ReplicationError::ParticipantResigned)?;

        Ok((log_core, DeferredAction::noop()))
    }

    async fn wait_for(&self, _: LogIndex) -> Result<WaitForResult, ReplicationError> {
        Err(ReplicationError::ParticipantUnconfigured)
    }
}
