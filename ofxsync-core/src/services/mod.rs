//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod logging;
pub mod migration;
mod sync;
mod tag;

pub use logging::{EntryPoint, LogEntry, LoggingService, LOG_DATABASE};
pub use migration::{MigrationResult, MigrationService};
pub use sync::{AccountSyncResult, SyncFailure, SyncResult, SyncService, SyncTotals};
pub use tag::{policy_from_settings, DefaultTags, RuleTagPolicy};
