//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod event_sink;
mod repository;
mod tagging;
mod transport;

pub use event_sink::{EventSink, MemoryEventSink, NoopEventSink};
pub use repository::{AccountCommit, CommitOutcome, SyncStore};
pub use tagging::TaggingPolicy;
pub use transport::Transport;
