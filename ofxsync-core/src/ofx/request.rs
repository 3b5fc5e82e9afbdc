//! Statement download request documents
//!
//! A [`RequestBuilder`] lives for one sync pass. It owns the client cookie
//! sequence, so every document it produces carries a `CLTCOOKIE` one higher
//! than the previous one.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use super::element::{Element, CRLF};
use crate::config::OfxSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountType, Credentials};

/// `DTSTART` used when an account has never been synced
pub const EPOCH_START: &str = "19700101000000";

const DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const INITIAL_COOKIE: u64 = 3;

pub struct RequestBuilder {
    defaults: OfxSettings,
    cookie: AtomicU64,
}

impl RequestBuilder {
    pub fn new(defaults: OfxSettings) -> Self {
        Self {
            defaults,
            cookie: AtomicU64::new(INITIAL_COOKIE),
        }
    }

    /// Advance and return the client cookie
    pub fn next_cookie(&self) -> u64 {
        self.cookie.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Protocol version for this account's bank, e.g. "103" or "1.03"
    pub fn effective_version<'a>(&'a self, account: &'a Account) -> &'a str {
        override_or(account.bank.ofx_version.as_deref(), &self.defaults.version)
    }

    /// Header block, ending with an empty line
    pub fn build_header(version: &str) -> Result<String> {
        let digits = version_digits(version);
        if digits.is_empty() {
            return Err(Error::config(format!("invalid OFX version '{}'", version)));
        }

        let version_line = format!("VERSION:{}", digits);
        let lines = [
            "OFXHEADER:100",
            "DATA:OFXSGML",
            version_line.as_str(),
            "SECURITY:NONE",
            "ENCODING:USASCII",
            "CHARSET:1252",
            "COMPRESSION:NONE",
            "OLDFILEUID:NONE",
            "NEWFILEUID:NONE",
            "",
        ];
        Ok(lines.join(CRLF))
    }

    /// `SIGNONMSGSRQV1` block stamped with the current local time
    pub fn build_sign_on(&self, account: &Account, credentials: &Credentials) -> Result<Element> {
        self.build_sign_on_at(account, credentials, Local::now().naive_local())
    }

    fn build_sign_on_at(
        &self,
        account: &Account,
        credentials: &Credentials,
        now: NaiveDateTime,
    ) -> Result<Element> {
        let bank = &account.bank;
        let org = bank
            .org()
            .ok_or_else(|| Error::config(format!("bank {} has no OFX organization", bank.id)))?;

        let mut fi = vec![Element::leaf("ORG", org)];
        if let Some(fid) = bank.ofx_id.as_deref().filter(|f| !f.trim().is_empty()) {
            fi.push(Element::leaf("FID", fid));
        }

        let mut sonrq = vec![
            Element::leaf("DTCLIENT", now.format(DATE_FORMAT).to_string()),
            Element::leaf("USERID", credentials.username()),
            Element::leaf("USERPASS", credentials.password()),
            Element::leaf("LANGUAGE", "ENG"),
            Element::aggregate("FI", fi),
            Element::leaf(
                "APPID",
                override_or(bank.app_id.as_deref(), &self.defaults.app_id),
            ),
            Element::leaf(
                "APPVER",
                override_or(bank.app_version.as_deref(), &self.defaults.app_version),
            ),
        ];

        if version_digits(self.effective_version(account)) == "103" {
            if let Some(uid) = bank.client_uid.as_deref().filter(|u| !u.trim().is_empty()) {
                sonrq.push(Element::leaf("CLIENTUID", uid));
            }
        }

        Ok(Element::aggregate(
            "SIGNONMSGSRQV1",
            vec![Element::aggregate("SONRQ", sonrq)],
        ))
    }

    /// `BANKMSGSRQV1` statement request for checking and savings accounts
    pub fn build_bank_statement_request(&self, account: &Account) -> Result<Element> {
        let acct_type = match account.account_type {
            AccountType::Checking => "CHECKING",
            AccountType::Savings => "SAVINGS",
            other => {
                return Err(Error::UnsupportedAccountType(format!(
                    "{} accounts have no bank statement request",
                    other
                )))
            }
        };

        let routing_number = account
            .bank
            .routing_number
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!("bank {} has no routing number", account.bank.id))
            })?;

        let stmtrq = Element::aggregate(
            "STMTRQ",
            vec![
                Element::aggregate(
                    "BANKACCTFROM",
                    vec![
                        Element::leaf("BANKID", routing_number),
                        Element::leaf("ACCTID", &account.number),
                        Element::leaf("ACCTTYPE", acct_type),
                    ],
                ),
                incremental(account),
            ],
        );

        Ok(self.wrap_transaction("BANK", "STMT", stmtrq))
    }

    /// `CREDITCARDMSGSRQV1` statement request
    pub fn build_credit_card_statement_request(&self, account: &Account) -> Element {
        let ccstmtrq = Element::aggregate(
            "CCSTMTRQ",
            vec![
                Element::aggregate(
                    "CCACCTFROM",
                    vec![Element::leaf("ACCTID", &account.number)],
                ),
                incremental(account),
            ],
        );

        self.wrap_transaction("CREDITCARD", "CCSTMT", ccstmtrq)
    }

    /// Wrap `body` in `<message_set>MSGSRQV1` / `<transaction_type>TRNRQ`
    pub fn wrap_transaction(
        &self,
        message_set: &str,
        transaction_type: &str,
        body: Element,
    ) -> Element {
        let trnuid = Uuid::new_v4().simple().to_string();
        let cookie = self.next_cookie();

        Element::aggregate(
            format!("{}MSGSRQV1", message_set),
            vec![Element::aggregate(
                format!("{}TRNRQ", transaction_type),
                vec![
                    Element::leaf("TRNUID", trnuid),
                    Element::leaf("CLTCOOKIE", cookie.to_string()),
                    body,
                ],
            )],
        )
    }

    /// Complete statement download document for one account
    pub fn statement_request(&self, account: &Account) -> Result<String> {
        let credentials = account
            .credentials
            .as_ref()
            .ok_or_else(|| Error::config(format!("account {} has no credentials", account.id)))?;
        self.signed_statement_request(account, credentials)
    }

    /// Statement document signed with credentials held apart from the account
    pub fn signed_statement_request(
        &self,
        account: &Account,
        credentials: &Credentials,
    ) -> Result<String> {
        if account.bank.endpoint().is_none() {
            return Err(Error::config(format!(
                "bank {} has no OFX endpoint",
                account.bank.id
            )));
        }

        let header = Self::build_header(self.effective_version(account))?;
        let sign_on = self.build_sign_on(account, credentials)?;
        let statement = match account.account_type {
            AccountType::Credit => self.build_credit_card_statement_request(account),
            AccountType::Checking | AccountType::Savings => {
                self.build_bank_statement_request(account)?
            }
        };

        let ofx = Element::aggregate("OFX", vec![sign_on, statement]);
        Ok(format!("{}{}{}", header, CRLF, ofx.serialize()))
    }
}

fn incremental(account: &Account) -> Element {
    let start = account
        .last_date
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(EPOCH_START);

    Element::aggregate(
        "INCTRAN",
        vec![Element::leaf("DTSTART", start), Element::leaf("INCLUDE", "Y")],
    )
}

fn override_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(default)
}

fn version_digits(version: &str) -> String {
    version.chars().filter(char::is_ascii_digit).collect()
}
