//! Account and bank domain models

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::result::Error;

/// Kind of account held at an institution
///
/// The set is closed: the schema only admits these three values and the
/// request builder matches on them exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Savings,
    Checking,
    Credit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Checking => "checking",
            AccountType::Credit => "credit",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "savings" => Ok(AccountType::Savings),
            "checking" => Ok(AccountType::Checking),
            "credit" => Ok(AccountType::Credit),
            other => Err(Error::UnsupportedAccountType(other.to_string())),
        }
    }
}

/// A financial institution reachable over OFX
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bank {
    pub id: Uuid,
    pub description: Option<String>,
    /// `FID` in the sign-on FI block
    pub ofx_id: Option<String>,
    /// `ORG` in the sign-on FI block (required)
    pub ofx_org: Option<String>,
    /// Statement download endpoint (required)
    pub ofx_url: Option<String>,
    /// Protocol version override, e.g. "103" or "1.03"
    pub ofx_version: Option<String>,
    /// Sent as `CLIENTUID` for version 1.03 institutions
    pub client_uid: Option<String>,
    pub routing_number: Option<String>,
    /// Application id override (default comes from config)
    pub app_id: Option<String>,
    /// Application version override (default comes from config)
    pub app_version: Option<String>,
}

impl Bank {
    pub fn new(id: Uuid, ofx_org: impl Into<String>, ofx_url: impl Into<String>) -> Self {
        Self {
            id,
            ofx_org: Some(ofx_org.into()),
            ofx_url: Some(ofx_url.into()),
            ..Default::default()
        }
    }

    /// Endpoint URL, ignoring blank values
    pub fn endpoint(&self) -> Option<&str> {
        non_blank(self.ofx_url.as_deref())
    }

    /// Organization id, ignoring blank values
    pub fn org(&self) -> Option<&str> {
        non_blank(self.ofx_org.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Institution login for one account
///
/// The password is wiped from memory on drop and never shows up in `Debug`.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bank or credit card account polled by the sync pass
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub number: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub bank: Bank,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Eligible for automated sync
    pub auto: bool,
    /// Enabled at all
    pub available: bool,
    /// Institution-formatted end date of the last downloaded statement
    pub last_date: Option<String>,
}

impl Account {
    /// Create a new account with required fields
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        number: impl Into<String>,
        account_type: AccountType,
        bank: Bank,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            number: number.into(),
            account_type,
            balance: Decimal::ZERO,
            bank,
            credentials: None,
            auto: true,
            available: true,
            last_date: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Whether the automated pass should poll this account
    pub fn is_eligible(&self) -> bool {
        self.available && self.auto
    }

    /// Account number reduced to its last four characters
    pub fn masked_number(&self) -> String {
        let chars: Vec<char> = self.number.chars().collect();
        let start = chars.len().saturating_sub(4);
        chars[start..].iter().collect()
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.number.trim().is_empty() {
            return Err("account number cannot be empty");
        }
        Ok(())
    }
}
