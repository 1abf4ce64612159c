use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ReplicationOptions {
    /// Delay before retrying a follower after its first consecutive failure.
    pub error_backoff_initial: Option<Duration>,
    /// Upper bound of the exponential retry delay.
    pub error_backoff_max: Option<Duration>,
    /// Deadline for a single AppendEntries round trip.
    pub append_entries_timeout: Option<Duration>,
    /// Most entries sent in one AppendEntries request.
    pub max_entries_per_request: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct ReplicationOptionsValidated {
    pub error_backoff_initial: Duration,
    pub error_backoff_max: Duration,
    pub append_entries_timeout: Duration,
    pub max_entries_per_request: usize,
}

impl ReplicationOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.error_backoff_initial == Duration::from_millis(0) {
            return Err("Initial error backoff must be greater than zero");
        }
        if self.error_backoff_max < self.error_backoff_initial {
            return Err("Maximum error backoff must not be less than the initial error backoff");
        }
        if self.append_entries_timeout == Duration::from_millis(0) {
            return Err("AppendEntries timeout must be greater than zero");
        }
        if self.max_entries_per_request == 0 {
            return Err("AppendEntries requests must be allowed to carry at least one entry");
        }

        Ok(())
    }
}

impl Default for ReplicationOptionsValidated {
    fn default() -> Self {
        ReplicationOptionsValidated {
            error_backoff_initial: Duration::from_millis(50),
            error_backoff_max: Duration::from_secs(5),
            append_entries_timeout: Duration::from_secs(2),
            max_entries_per_request: 1000,
        }
    }
}

impl TryFrom<ReplicationOptions> for ReplicationOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ReplicationOptions) -> Result<Self, Self::Error> {
        let defaults = ReplicationOptionsValidated::default();
        let values = ReplicationOptionsValidated {
            error_backoff_initial: options.error_backoff_initial.unwrap_or(defaults.error_backoff_initial),
            error_backoff_max: options.error_backoff_max.unwrap_or(defaults.error_backoff_max),
            append_entries_timeout: options
                .append_entries_timeout
                .unwrap_or(defaults.append_entries_timeout),
            max_entries_per_request: options
                .max_entries_per_request
                .unwrap_or(defaults.max_entries_per_request),
        };

        values.validate()?;
        Ok(values)
    }
}
