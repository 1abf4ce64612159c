use crate::api::ReplicationOptionsValidated;
use crate::log_core::{LogIndex, TermIndexPair};
use crate::replication::{
    AbstractFollower, AppendEntriesErrorReason, FollowerReplicationState, FollowerStatistics, MessageId,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// The leader's view of one follower, including its own local follower.
pub(super) struct FollowerInfo {
    pub(super) follower: Arc<dyn AbstractFollower>,

    // > index of highest log entry known to be replicated on server
    // Only counts toward commit once its term is the leader's term. Seeded with the leader's last
    // entry from before its term started, and moved back after a NoPrevLogMatch rejection.
    pub(super) last_acked_entry: TermIndexPair,
    pub(super) last_acked_commit_index: LogIndex,
    pub(super) last_acked_lci: LogIndex,

    // Same idea as a raft peer's seq-no: a logical clock over this leader's requests to this
    // follower. Only a response to the latest request is accepted.
    last_sent_message_id: MessageId,
    state: State,

    num_errors: usize,
    last_error_reason: AppendEntriesErrorReason,
    last_error_message: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    last_request_latency: Option<Duration>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Preparing { message_id: MessageId },
    InFlight { message_id: MessageId, sent_at: Instant },
    ErrorBackoff { until: Instant },
}

/// What the leader knew when it built a request. The response is interpreted against this, not
/// against whatever the leader's state has become in the meantime.
#[derive(Clone, Debug)]
pub(super) struct AppendEntriesDescriptor {
    pub(super) message_id: MessageId,
    pub(super) prev_log_entry: TermIndexPair,
    pub(super) last_entry: TermIndexPair,
    pub(super) leader_commit: LogIndex,
    pub(super) largest_common_index: LogIndex,
}

impl FollowerInfo {
    pub(super) fn new(follower: Arc<dyn AbstractFollower>, seed: TermIndexPair) -> Self {
        FollowerInfo {
            follower,
            last_acked_entry: seed,
            last_acked_commit_index: LogIndex::zero(),
            last_acked_lci: LogIndex::zero(),
            last_sent_message_id: MessageId::default(),
            state: State::Idle,
            num_errors: 0,
            last_error_reason: AppendEntriesErrorReason::None,
            last_error_message: None,
            last_error_at: None,
            last_request_latency: None,
        }
    }

    pub(super) fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Idle, or done waiting out an error backoff.
    pub(super) fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            State::Idle => true,
            State::ErrorBackoff { until } => until <= now,
            State::Preparing { .. } | State::InFlight { .. } => false,
        }
    }

    pub(super) fn has_pending_work(&self, spearhead: LogIndex, commit_index: LogIndex, lci: LogIndex) -> bool {
        self.last_acked_entry.index < spearhead
            || self.last_acked_commit_index < commit_index
            || self.last_acked_lci < lci
    }

    /// Allocates the next message id. The follower is `Preparing` until the dispatching task
    /// picks the request up.
    pub(super) fn prepare(&mut self) -> MessageId {
        self.last_sent_message_id = self.last_sent_message_id.next();
        self.state = State::Preparing {
            message_id: self.last_sent_message_id,
        };
        self.last_sent_message_id
    }

    pub(super) fn mark_in_flight(&mut self, message_id: MessageId, now: Instant) {
        if self.state == (State::Preparing { message_id }) {
            self.state = State::InFlight {
                message_id,
                sent_at: now,
            };
        }
    }

    /// True iff `message_id` is the request this follower is currently waiting on.
    pub(super) fn expects(&self, message_id: MessageId) -> bool {
        match self.state {
            State::Preparing { message_id: m } | State::InFlight { message_id: m, .. } => m == message_id,
            State::Idle | State::ErrorBackoff { .. } => false,
        }
    }

    pub(super) fn record_success(&mut self, descriptor: &AppendEntriesDescriptor, now: Instant) {
        if let State::InFlight { sent_at, .. } = self.state {
            self.last_request_latency = Some(now.saturating_duration_since(sent_at));
        }

        self.last_acked_entry = descriptor.last_entry;
        self.last_acked_commit_index = descriptor.leader_commit;
        self.last_acked_lci = descriptor.largest_common_index;
        self.num_errors = 0;
        self.last_error_reason = AppendEntriesErrorReason::None;
        self.last_error_message = None;
        self.state = State::Idle;
    }

    /// Moves into error backoff and returns when the follower should be retried.
    pub(super) fn record_failure(
        &mut self,
        reason: AppendEntriesErrorReason,
        message: Option<String>,
        now: Instant,
        options: &ReplicationOptionsValidated,
    ) -> Instant {
        self.num_errors += 1;
        self.last_error_reason = reason;
        self.last_error_message = message;
        self.last_error_at = Some(Utc::now());

        let delay = backoff_delay(self.num_errors, options);
        let until = now + delay + jitter(delay);
        self.state = State::ErrorBackoff { until };
        until
    }

    pub(super) fn statistics(&self, now: Instant) -> FollowerStatistics {
        let state = match self.state {
            State::Idle => FollowerReplicationState::Idle,
            State::Preparing { .. } => FollowerReplicationState::Preparing,
            State::InFlight { .. } => FollowerReplicationState::InFlight,
            State::ErrorBackoff { until } => FollowerReplicationState::ErrorBackoff {
                remaining: until.saturating_duration_since(now),
            },
        };

        FollowerStatistics {
            last_acked_entry: self.last_acked_entry,
            commit_index: self.last_acked_commit_index,
            largest_common_index: self.last_acked_lci,
            state,
            num_errors: self.num_errors,
            last_error_reason: self.last_error_reason,
            last_error_message: self.last_error_message.clone(),
            last_error_at: self.last_error_at,
            last_request_latency: self.last_request_latency,
        }
    }
}

/// `initial * 2^(num_errors - 1)`, capped at `max`.
fn backoff_delay(num_errors: usize, options: &ReplicationOptionsValidated) -> Duration {
    let exponent = num_errors.saturating_sub(1).min(31) as u32;
    options
        .error_backoff_initial
        .checked_mul(1u32 << exponent)
        .map_or(options.error_backoff_max, |d| d.min(options.error_backoff_max))
}

// Up to 10% extra, so followers failing together don't retry in lockstep.
fn jitter(delay: Duration) -> Duration {
    let max_jitter_micros = (delay.as_micros() / 10) as u64;
    Duration::from_micros(rand::thread_rng().gen_range(0..=max_jitter_micros))
}
