use crate::log_core::{LogCore, LogCoreError, LogEntry, LogIndex, LogTerm, TermIndexPair};
use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub(crate) struct InMemoryLogEntry {
    pub(crate) entry: LogEntry,
    pub(crate) wait_for_sync: bool,
}

/// InMemoryLog is the participant's view of its log tail.
///
/// Invariants: indexes are strictly increasing without gaps, terms never decrease. The first held
/// entry may start after index 1 if the physical log's front was compacted away.
#[derive(Clone, Debug, Default)]
pub(crate) struct InMemoryLog {
    entries: VecDeque<InMemoryLogEntry>,
}

impl InMemoryLog {
    pub(crate) fn new() -> Self {
        InMemoryLog {
            entries: VecDeque::new(),
        }
    }

    /// Rebuilds the tail from whatever the physical log holds.
    pub(crate) async fn load(log_core: &LogCore) -> Result<Self, LogCoreError> {
        let mut log = InMemoryLog::new();
        for entry in log_core.read(LogIndex::start_index()).await? {
            log.entries.push_back(InMemoryLogEntry {
                entry,
                wait_for_sync: false,
            });
        }

        Ok(log)
    }

    pub(crate) fn last_entry(&self) -> TermIndexPair {
        self.entries
            .back()
            .map(|e| e.entry.term_index_pair())
            .unwrap_or_default()
    }

    pub(crate) fn last_index(&self) -> LogIndex {
        self.last_entry().index
    }

    pub(crate) fn first_index(&self) -> Option<LogIndex> {
        self.entries.front().map(|e| e.entry.index())
    }

    pub(crate) fn first_entry(&self) -> Option<TermIndexPair> {
        self.entries.front().map(|e| e.entry.term_index_pair())
    }

    pub(crate) fn next_index(&self) -> LogIndex {
        self.last_index().plus(1)
    }

    pub(crate) fn get(&self, index: LogIndex) -> Option<&InMemoryLogEntry> {
        let first = self.first_index()?;
        if index < first {
            return None;
        }
        self.entries.get((index.as_u64() - first.as_u64()) as usize)
    }

    pub(crate) fn term_at(&self, index: LogIndex) -> Option<LogTerm> {
        self.get(index).map(|e| e.entry.term())
    }

    /// Appends one entry. The caller is responsible for choosing `next_index()`.
    pub(crate) fn append(&mut self, entry: InMemoryLogEntry) {
        debug_assert_eq!(entry.entry.index(), self.next_index(), "InMemoryLog must stay gap-free");
        debug_assert!(entry.entry.term() >= self.last_entry().term, "InMemoryLog terms must not decrease");
        self.entries.push_back(entry);
    }

    /// Drops every entry `>= start`.
    pub(crate) fn truncate(&mut self, start: LogIndex) {
        while matches!(self.entries.back(), Some(e) if e.entry.index() >= start) {
            self.entries.pop_back();
        }
    }

    /// Up to `max` entries starting at `start`. Returns `None` if `start` is no longer held in
    /// memory (compacted away) while later entries exist.
    pub(crate) fn slice(&self, start: LogIndex, max: usize) -> Option<Vec<InMemoryLogEntry>> {
        match self.first_index() {
            None => Some(Vec::new()),
            Some(first) if start < first => None,
            Some(first) => Some(
                self.entries
                    .iter()
                    .skip((start.as_u64() - first.as_u64()) as usize)
                    .take(max)
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Entries in `[start, stop]`, clamped to what is held.
    pub(crate) fn range(&self, start: LogIndex, stop: LogIndex) -> Vec<LogEntry> {
        self.entries
            .iter()
            .map(|e| &e.entry)
            .filter(|e| e.index() >= start && e.index() <= stop)
            .cloned()
            .collect()
    }

    /// Position of the last entry whose term is strictly lower than `term`, or `(0, 0)`.
    pub(crate) fn last_entry_before_term(&self, term: LogTerm) -> TermIndexPair {
        self.entries
            .iter()
            .rev()
            .map(|e| e.entry.term_index_pair())
            .find(|pair| pair.term < term)
            .unwrap_or_default()
    }
}
