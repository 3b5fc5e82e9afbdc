//! Storage port used by the sync pass

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{Account, Transaction};

/// Everything one account's sync writes, applied as a single unit
#[derive(Debug, Clone)]
pub struct AccountCommit {
    pub account_id: Uuid,
    /// New sync cursor
    pub last_date: String,
    pub balance: Decimal,
    /// New transactions in statement order
    pub transactions: Vec<Transaction>,
    /// Skip records whose (account, FITID) is already stored or repeated in
    /// this batch
    pub dedupe_by_fitid: bool,
}

/// Result of a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Storage abstraction for the sync pass
///
/// Implementations must apply a commit atomically: either every row and the
/// account update land, or nothing does.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Accounts with `available` and `auto` set, ordered by name then id,
    /// with credentials loaded
    async fn eligible_accounts(&self) -> Result<Vec<Account>>;

    /// Persist new transactions, their tags and the account's cursor/balance
    async fn commit_account_sync(&self, commit: &AccountCommit) -> Result<CommitOutcome>;
}
