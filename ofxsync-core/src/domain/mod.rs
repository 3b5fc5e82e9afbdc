//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
mod event;
mod transaction;
pub mod result;

pub use account::{Account, AccountType, Bank, Credentials};
pub use event::{LogEvent, ACCOUNT_FAILED, ACCOUNT_SYNCED, SYNC_COMPLETED, SYNC_STARTED};
pub use transaction::{Tag, Transaction, TransactionKind};
