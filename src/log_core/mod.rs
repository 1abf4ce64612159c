//! Storage boundary of the replicated log: the value types every layer shares, the
//! `PersistedLog` trait implemented by a storage engine, and `LogCore`, the exclusive handle a
//! participant uses to touch the physical log.

mod handle;
mod in_memory;
mod log;

pub use handle::LogCore;
pub use handle::LogCoreError;
pub use in_memory::InMemoryPersistedLog;
pub use log::LogEntry;
pub use log::LogId;
pub use log::LogIndex;
pub use log::LogPayload;
pub use log::LogTerm;
pub use log::PersistedLog;
pub use log::PersistedLogError;
pub use log::PersistedLogIterator;
pub use log::TermIndexPair;
pub use log::WriteOptions;
