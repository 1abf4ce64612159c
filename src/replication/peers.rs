use std::fmt;

/// ParticipantId identifies a leader or follower of one replicated log.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        ParticipantId::new(s)
    }
}

/// MessageId is a logical clock over one leader's conversation with one follower. It strictly
/// increases with every request sent, so a follower can discard duplicated or reordered
/// requests.
#[derive(Copy, Clone, Default, Debug, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        MessageId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
