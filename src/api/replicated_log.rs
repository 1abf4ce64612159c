use crate::api::options::ReplicationOptionsValidated;
use crate::log_core::{LogCore, LogTerm};
use crate::replication::{
    self, AbstractFollower, Clock, InMemoryLog, LogFollower, LogLeader, LogLeaderConfig, LogParticipant, LogStatus,
    LogUnconfigured, ParticipantId, RealClock, ReplicationError,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// ReplicatedLog owns one log's LogCore and the participant currently acting on it.
///
/// Role changes resign the active participant, move its LogCore into the new one and install it,
/// all under one lock. No two participants ever hold the same LogCore.
pub struct ReplicatedLog<C: Clock = RealClock> {
    logger: slog::Logger,
    options: ReplicationOptionsValidated,
    clock: C,
    // `None` once dropped.
    participant: Mutex<Option<ActiveParticipant<C>>>,
}

#[derive(Clone)]
enum ActiveParticipant<C: Clock> {
    Unconfigured(Arc<LogUnconfigured>),
    Leader(Arc<LogLeader<C>>),
    Follower(Arc<LogFollower>),
}

impl<C: Clock> ActiveParticipant<C> {
    fn as_participant(&self) -> &dyn LogParticipant {
        match self {
            ActiveParticipant::Unconfigured(p) => p.as_ref(),
            ActiveParticipant::Leader(p) => p.as_ref(),
            ActiveParticipant::Follower(p) => p.as_ref(),
        }
    }
}

impl<C: Clock> ReplicatedLog<C> {
    pub(crate) fn new(logger: slog::Logger, log_core: LogCore, options: ReplicationOptionsValidated, clock: C) -> Self {
        let logger = logger.new(slog::o!("LogId" => log_core.log_id().0));
        ReplicatedLog {
            logger,
            options,
            clock,
            participant: Mutex::new(Some(ActiveParticipant::Unconfigured(Arc::new(
                LogUnconfigured::new(log_core),
            )))),
        }
    }

    /// Replaces the active participant with a leader for `term`. Nothing changes if the
    /// followers and write concern are invalid.
    pub async fn become_leader(
        &self,
        participant_id: ParticipantId,
        term: LogTerm,
        followers: Vec<Arc<dyn AbstractFollower>>,
        write_concern: usize,
    ) -> Result<Arc<LogLeader<C>>, ReplicationError> {
        replication::validate_participants(&participant_id, &followers, write_concern)?;

        let mut guard = self.participant.lock().await;
        let (log_core, action) = Self::resign_current(&guard).await?;

        let in_memory_log = match InMemoryLog::load(&log_core).await {
            Ok(log) => log,
            Err(e) => {
                slog::error!(self.logger, "Failed to read log while becoming leader: {}", e);
                *guard = Some(ActiveParticipant::Unconfigured(Arc::new(LogUnconfigured::new(log_core))));
                drop(guard);
                action.fire();
                return Err(e.into());
            }
        };

        let leader = LogLeader::construct(LogLeaderConfig {
            logger: self.logger.clone(),
            participant_id,
            term,
            log_core,
            in_memory_log,
            followers,
            write_concern,
            options: self.options.clone(),
            clock: self.clock.clone(),
        });
        *guard = Some(ActiveParticipant::Leader(leader.clone()));
        drop(guard);

        action.fire();
        leader.trigger_async_replication();

        Ok(leader)
    }

    /// Replaces the active participant with a follower of `leader_id` in `term`.
    pub async fn become_follower(
        &self,
        participant_id: ParticipantId,
        term: LogTerm,
        leader_id: ParticipantId,
    ) -> Result<Arc<LogFollower>, ReplicationError> {
        let mut guard = self.participant.lock().await;
        let (log_core, action) = Self::resign_current(&guard).await?;

        let in_memory_log = match InMemoryLog::load(&log_core).await {
            Ok(log) => log,
            Err(e) => {
                slog::error!(self.logger, "Failed to read log while becoming follower: {}", e);
                *guard = Some(ActiveParticipant::Unconfigured(Arc::new(LogUnconfigured::new(log_core))));
                drop(guard);
                action.fire();
                return Err(e.into());
            }
        };

        let follower = Arc::new(LogFollower::new(
            self.logger.clone(),
            participant_id,
            term,
            leader_id,
            log_core,
            in_memory_log,
        ));
        *guard = Some(ActiveParticipant::Follower(follower.clone()));
        drop(guard);

        action.fire();

        Ok(follower)
    }

    pub async fn get_leader(&self) -> Result<Arc<LogLeader<C>>, ReplicationError> {
        match self.active().await? {
            ActiveParticipant::Leader(leader) => Ok(leader),
            _ => Err(ReplicationError::NotTheLeader),
        }
    }

    pub async fn get_follower(&self) -> Result<Arc<LogFollower>, ReplicationError> {
        match self.active().await? {
            ActiveParticipant::Follower(follower) => Ok(follower),
            _ => Err(ReplicationError::NotTheFollower),
        }
    }

    pub async fn get_status(&self) -> Result<LogStatus, ReplicationError> {
        let active = self.active().await?;
        Ok(active.as_participant().status().await)
    }

    /// Resigns the active participant and hands the LogCore back. The log is unusable afterwards.
    pub async fn drop_participant(&self) -> Result<LogCore, ReplicationError> {
        let mut guard = self.participant.lock().await;
        let (log_core, action) = Self::resign_current(&guard).await?;
        *guard = None;
        drop(guard);

        action.fire();
        slog::info!(self.logger, "Dropped replicated log");

        Ok(log_core)
    }

    async fn active(&self) -> Result<ActiveParticipant<C>, ReplicationError> {
        self.participant
            .lock()
            .await
            .clone()
            .ok_or(ReplicationError::LogDropped)
    }

    async fn resign_current(
        current: &Option<ActiveParticipant<C>>,
    ) -> Result<(LogCore, replication::DeferredAction), ReplicationError> {
        let current = current.as_ref().ok_or(ReplicationError::LogDropped)?;
        current.as_participant().resign().await
    }
}
