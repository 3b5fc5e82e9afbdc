//! Transaction domain model

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OFX `TRNTYPE` codes
///
/// Codes the institution sends that are not in this list map to `Other`; the
/// verbatim code is always kept in [`Transaction::ori_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Credit,
    Debit,
    Int,
    Div,
    Fee,
    SrvChg,
    Dep,
    Atm,
    Pos,
    Xfer,
    Check,
    Payment,
    Cash,
    DirectDep,
    DirectDebit,
    RepeatPmt,
    Hold,
    Other,
}

impl TransactionKind {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "CREDIT" => Self::Credit,
            "DEBIT" => Self::Debit,
            "INT" => Self::Int,
            "DIV" => Self::Div,
            "FEE" => Self::Fee,
            "SRVCHG" => Self::SrvChg,
            "DEP" => Self::Dep,
            "ATM" => Self::Atm,
            "POS" => Self::Pos,
            "XFER" => Self::Xfer,
            "CHECK" => Self::Check,
            "PAYMENT" => Self::Payment,
            "CASH" => Self::Cash,
            "DIRECTDEP" => Self::DirectDep,
            "DIRECTDEBIT" => Self::DirectDebit,
            "REPEATPMT" => Self::RepeatPmt,
            "HOLD" => Self::Hold,
            _ => Self::Other,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
            Self::Int => "INT",
            Self::Div => "DIV",
            Self::Fee => "FEE",
            Self::SrvChg => "SRVCHG",
            Self::Dep => "DEP",
            Self::Atm => "ATM",
            Self::Pos => "POS",
            Self::Xfer => "XFER",
            Self::Check => "CHECK",
            Self::Payment => "PAYMENT",
            Self::Cash => "CASH",
            Self::DirectDep => "DIRECTDEP",
            Self::DirectDebit => "DIRECTDEBIT",
            Self::RepeatPmt => "REPEATPMT",
            Self::Hold => "HOLD",
            Self::Other => "OTHER",
        }
    }
}

/// A single transaction downloaded from an institution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub posted_at: NaiveDateTime,
    /// Payee name with the memo appended
    pub description: String,
    pub kind: TransactionKind,
    /// Tag names
    pub tags: Vec<String>,
    pub is_notified: bool,
    pub created_at: DateTime<Utc>,

    // =========================================================================
    // Verbatim institution fields
    // =========================================================================
    /// `TRNTYPE`
    pub ori_type: String,
    /// `TRNAMT`
    pub ori_amount: String,
    /// `NAME`
    pub ori_name: String,
    /// `MEMO`
    pub ori_memo: Option<String>,
    /// `DTPOSTED`
    pub ori_postdate: String,
    /// `FITID`
    pub ori_fitid: String,
}

impl Transaction {
    /// Create a new transaction with required fields
    pub fn new(id: Uuid, account_id: Uuid, amount: Decimal, posted_at: NaiveDateTime) -> Self {
        Self {
            id,
            account_id,
            amount,
            posted_at,
            description: String::new(),
            kind: TransactionKind::Other,
            tags: Vec::new(),
            is_notified: false,
            created_at: Utc::now(),
            ori_type: String::new(),
            ori_amount: String::new(),
            ori_name: String::new(),
            ori_memo: None,
            ori_postdate: String::new(),
            ori_fitid: String::new(),
        }
    }

    /// FITID usable as a dedup key (blank ids never dedupe)
    pub fn fitid(&self) -> Option<&str> {
        let fitid = self.ori_fitid.trim();
        (!fitid.is_empty()).then_some(fitid)
    }

    /// Normalize tags: deduplicate, trim whitespace, remove empty
    pub fn normalize_tags(tags: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for tag in tags {
            let trimmed = tag.trim().to_string();
            if !trimmed.is_empty() && seen.insert(trimmed.clone()) {
                result.push(trimmed);
            }
        }

        result
    }
}

/// A named label attached to transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}
