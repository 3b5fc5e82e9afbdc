//! Tagging port

use crate::domain::{Account, Transaction};

/// Decides which tags a freshly downloaded transaction receives
pub trait TaggingPolicy: Send + Sync {
    fn tags_for(&self, account: &Account, transaction: &Transaction) -> Vec<String>;
}
