//! Statement download response parsing

use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

use super::sgml::Node;
use crate::domain::result::{Error, Result};

const POSTED_FORMAT: &str = "%Y%m%d%H%M%S";

/// One `STMTTRN` record, fields as sent by the institution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementRecord {
    pub trn_type: String,
    pub posted: String,
    pub amount: String,
    pub name: String,
    pub memo: Option<String>,
    pub fitid: String,
}

impl StatementRecord {
    fn from_node(node: &Node) -> Self {
        let field = |tag: &str| node.find_text(tag).unwrap_or_default().to_string();
        Self {
            trn_type: field("TRNTYPE"),
            posted: field("DTPOSTED"),
            amount: field("TRNAMT"),
            name: field("NAME"),
            memo: node
                .find_text("MEMO")
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            fitid: field("FITID"),
        }
    }

    /// Payee name with the memo appended, no separator
    pub fn description(&self) -> String {
        match &self.memo {
            Some(memo) => format!("{}{}", self.name, memo),
            None => self.name.clone(),
        }
    }

    pub fn posted_at(&self) -> Result<NaiveDateTime> {
        parse_posted_date(&self.posted)
    }

    pub fn amount_value(&self) -> Result<Decimal> {
        parse_amount(&self.amount)
            .map_err(|_| Error::malformed(format!("TRNAMT '{}' is not a number", self.amount)))
    }
}

/// A `STATUS` aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub code: String,
    pub severity: String,
    pub message: Option<String>,
}

impl Status {
    fn from_node(node: &Node) -> Self {
        Self {
            code: node.find_text("CODE").unwrap_or_default().to_string(),
            severity: node.find_text("SEVERITY").unwrap_or_default().to_string(),
            message: node.find_text("MESSAGE").map(str::to_string),
        }
    }

    /// A missing code counts as success
    pub fn is_success(&self) -> bool {
        self.code.is_empty() || self.code == "0"
    }
}

/// Everything a sync needs from one response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// `DTEND`, kept verbatim as the next sync cursor
    pub end_date: String,
    pub balance: Decimal,
    pub transactions: Vec<StatementRecord>,
}

/// A parsed response body
#[derive(Debug, Clone)]
pub struct OfxResponse {
    root: Node,
}

impl OfxResponse {
    pub fn parse(body: &str) -> Self {
        Self {
            root: Node::parse(body),
        }
    }

    /// `DTEND` of the first `BANKTRANLIST`
    pub fn parse_statement_end(&self) -> Option<&str> {
        self.root
            .find("BANKTRANLIST")
            .and_then(|list| list.find_text("DTEND"))
    }

    /// First `BALAMT` in document order
    pub fn parse_balance(&self) -> Option<&str> {
        self.root.find_text("BALAMT")
    }

    pub fn parse_transactions(&self) -> Vec<StatementRecord> {
        self.root
            .find_all("STMTTRN")
            .into_iter()
            .map(StatementRecord::from_node)
            .collect()
    }

    /// Sign-on and statement transaction status blocks
    pub fn parse_status(&self) -> Vec<Status> {
        ["SONRS", "STMTTRNRS", "CCSTMTTRNRS"]
            .iter()
            .flat_map(|tag| self.root.find_all(tag))
            .filter_map(|rs| rs.child("STATUS"))
            .map(Status::from_node)
            .collect()
    }

    /// Validate status and required fields, then extract the statement
    pub fn parse_statement(&self) -> Result<Statement> {
        if let Some(status) = self.parse_status().into_iter().find(|s| !s.is_success()) {
            return Err(Error::Rejected {
                code: status.code,
                severity: status.severity,
                message: status.message.unwrap_or_default(),
            });
        }

        let end_date = self
            .parse_statement_end()
            .ok_or_else(|| Error::malformed("statement end date (DTEND) missing"))?
            .to_string();

        let raw_balance = self
            .parse_balance()
            .ok_or_else(|| Error::malformed("balance (BALAMT) missing"))?;
        let balance = parse_amount(raw_balance)
            .map_err(|_| Error::malformed(format!("BALAMT '{}' is not a number", raw_balance)))?;

        Ok(Statement {
            end_date,
            balance,
            transactions: self.parse_transactions(),
        })
    }
}

/// Parse and validate a response body in one go
pub fn parse_statement(body: &str) -> Result<Statement> {
    OfxResponse::parse(body).parse_statement()
}

/// Interpret the first 14 characters as `YYYYMMDDHHMMSS`
///
/// Fractional seconds and the bracketed time zone are discarded.
pub fn parse_posted_date(raw: &str) -> Result<NaiveDateTime> {
    let head = raw.trim().get(..14).ok_or_else(|| {
        Error::malformed(format!("posted date '{}' is shorter than 14 characters", raw))
    })?;

    NaiveDateTime::parse_from_str(head, POSTED_FORMAT)
        .map_err(|e| Error::malformed(format!("posted date '{}': {}", raw, e)))
}

/// Decimal amount, accepting a leading '+' and a comma decimal separator
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_str(&trimmed.replace(',', ".")))
        .map_err(|e| Error::malformed(format!("amount '{}': {}", raw, e)))
}
