//! DuckDB repository implementation

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountType, Bank, Credentials, Tag, Transaction, TransactionKind};
use crate::ports::{AccountCommit, CommitOutcome, SyncStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of attempts when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCOUNT_COLUMNS: &str = "a.account_id, a.bank_id, a.name, a.number, a.account_type,
    CAST(a.balance AS VARCHAR), a.username, a.password, a.auto_sync, a.available, a.last_date,
    b.description, b.ofx_id, b.ofx_org, b.ofx_url, b.ofx_version, b.ofx_client_uid,
    b.routing_number, b.app_id, b.app_version";

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, CAST(amount AS VARCHAR),
    CAST(posted_at AS VARCHAR), description, kind, is_notified, ori_type, ori_amount,
    ori_name, ori_memo, ori_postdate, ori_fitid, created_at";

/// Check if an error message indicates a file locking issue that should be retried
fn is_lock_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Retries with exponential backoff while another process holds the file
    /// lock, e.g. a scheduled pass overlapping a manual one.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut attempt = 0;
        loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) if is_lock_error(&e.to_string()) && attempt + 1 < MAX_RETRIES => {
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying: {}",
                        e
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off: nothing here needs one
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("connection lock poisoned: {}", e)))
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // === Bank and account operations ===

    pub fn insert_bank(&self, bank: &Bank) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_banks (bank_id, description, ofx_id, ofx_org, ofx_url, ofx_version,
                                    ofx_client_uid, routing_number, app_id, app_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                bank.id.to_string(),
                bank.description,
                bank.ofx_id,
                bank.ofx_org,
                bank.ofx_url,
                bank.ofx_version,
                bank.client_uid,
                bank.routing_number,
                bank.app_id,
                bank.app_version,
            ],
        )?;
        Ok(())
    }

    /// Insert an account (its bank is stored separately via `insert_bank`)
    pub fn insert_account(&self, account: &Account) -> Result<()> {
        account.validate().map_err(Error::config)?;
        let conn = self.conn()?;
        let (username, password) = match &account.credentials {
            Some(creds) => (Some(creds.username()), Some(creds.password())),
            None => (None, None),
        };

        conn.execute(
            "INSERT INTO sys_accounts (account_id, bank_id, name, number, account_type, balance,
                                       username, password, auto_sync, available, last_date)
             VALUES (?, ?, ?, ?, ?, CAST(? AS DECIMAL(18, 2)), ?, ?, ?, ?, ?)",
            params![
                account.id.to_string(),
                account.bank.id.to_string(),
                account.name,
                account.number,
                account.account_type.as_str(),
                account.balance.to_string(),
                username,
                password,
                account.auto,
                account.available,
                account.last_date,
            ],
        )?;
        Ok(())
    }

    pub fn get_accounts(&self) -> Result<Vec<Account>> {
        self.query_accounts("", &[])
    }

    pub fn get_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let id = id.to_string();
        Ok(self
            .query_accounts("WHERE a.account_id = ?", &[&id])?
            .into_iter()
            .next())
    }

    fn query_accounts(&self, filter: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_accounts a LEFT JOIN sys_banks b ON b.bank_id = a.bank_id {}
             ORDER BY a.name, a.account_id",
            ACCOUNT_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, AccountRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }

    // === Transaction operations ===

    /// Transactions of one account in insertion order, with tags
    pub fn get_transactions_by_account(&self, account_id: Uuid) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_transactions WHERE account_id = ? ORDER BY row_order",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([account_id.to_string()], TransactionRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tx = row.into_transaction()?;
            tx.tags = Self::tags_of(&conn, tx.id)?;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    pub fn get_transaction_tags(&self, transaction_id: Uuid) -> Result<Vec<String>> {
        let conn = self.conn()?;
        Self::tags_of(&conn, transaction_id)
    }

    fn tags_of(conn: &Connection, transaction_id: Uuid) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT t.name FROM sys_tags t
             JOIN sys_transaction_tags tt ON tt.tag_id = t.tag_id
             WHERE tt.transaction_id = ?
             ORDER BY t.name",
        )?;
        let names = stmt
            .query_map([transaction_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn get_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT tag_id, name FROM sys_tags ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name)| Ok(Tag { id: parse_uuid(&id)?, name }))
            .collect()
    }

    pub fn transaction_count(&self, account_id: Uuid) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sys_transactions WHERE account_id = ?",
            [account_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Apply one account's sync in a single transaction
    ///
    /// Dropping the transaction on any error rolls everything back.
    pub fn commit(&self, commit: &AccountCommit) -> Result<CommitOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut outcome = CommitOutcome::default();
        let mut batch_fitids = HashSet::new();
        let mut tag_ids: HashMap<String, String> = HashMap::new();

        for transaction in &commit.transactions {
            if commit.dedupe_by_fitid {
                if let Some(fitid) = transaction.fitid() {
                    let stored: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM sys_transactions WHERE account_id = ? AND ori_fitid = ?",
                        params![commit.account_id.to_string(), fitid],
                        |row| row.get(0),
                    )?;
                    if stored > 0 || !batch_fitids.insert(fitid.to_string()) {
                        outcome.skipped += 1;
                        continue;
                    }
                }
            }

            Self::insert_transaction(&tx, commit.account_id, transaction)?;

            for name in Transaction::normalize_tags(&transaction.tags) {
                let tag_id = match tag_ids.get(&name) {
                    Some(id) => id.clone(),
                    None => {
                        let id = Self::ensure_tag(&tx, &name)?;
                        tag_ids.insert(name.clone(), id.clone());
                        id
                    }
                };
                tx.execute(
                    "INSERT INTO sys_transaction_tags (tag_id, transaction_id) VALUES (?, ?)
                     ON CONFLICT DO NOTHING",
                    params![tag_id, transaction.id.to_string()],
                )?;
            }

            outcome.inserted += 1;
        }

        let updated = tx.execute(
            "UPDATE sys_accounts SET last_date = ?, balance = CAST(? AS DECIMAL(18, 2))
             WHERE account_id = ?",
            params![
                commit.last_date,
                commit.balance.to_string(),
                commit.account_id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("account {}", commit.account_id)));
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn insert_transaction(conn: &Connection, account_id: Uuid, tx: &Transaction) -> Result<()> {
        conn.execute(
            "INSERT INTO sys_transactions (transaction_id, account_id, amount, posted_at,
                                           description, kind, is_notified, ori_type, ori_amount,
                                           ori_name, ori_memo, ori_postdate, ori_fitid, created_at)
             VALUES (?, ?, CAST(? AS DECIMAL(18, 2)), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tx.id.to_string(),
                account_id.to_string(),
                tx.amount.to_string(),
                tx.posted_at.format(TIMESTAMP_FORMAT).to_string(),
                tx.description,
                tx.kind.as_code(),
                tx.is_notified,
                tx.ori_type,
                tx.ori_amount,
                tx.ori_name,
                tx.ori_memo,
                tx.ori_postdate,
                tx.ori_fitid,
                tx.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Tag id for `name`, creating the tag on first use
    fn ensure_tag(conn: &Connection, name: &str) -> Result<String> {
        conn.execute(
            "INSERT INTO sys_tags (tag_id, name) VALUES (?, ?) ON CONFLICT (name) DO NOTHING",
            params![Uuid::new_v4().to_string(), name],
        )?;
        let id = conn.query_row("SELECT tag_id FROM sys_tags WHERE name = ?", [name], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(id)
    }
}

#[async_trait]
impl SyncStore for DuckDbRepository {
    async fn eligible_accounts(&self) -> Result<Vec<Account>> {
        self.query_accounts("WHERE a.available AND a.auto_sync", &[])
    }

    async fn commit_account_sync(&self, commit: &AccountCommit) -> Result<CommitOutcome> {
        self.commit(commit)
    }
}

/// Raw account columns, converted outside the row callback
struct AccountRow {
    id: String,
    bank_id: String,
    name: String,
    number: String,
    account_type: String,
    balance: String,
    username: Option<String>,
    password: Option<String>,
    auto: bool,
    available: bool,
    last_date: Option<String>,
    bank: [Option<String>; 9],
}

impl AccountRow {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bank_id: row.get(1)?,
            name: row.get(2)?,
            number: row.get(3)?,
            account_type: row.get(4)?,
            balance: row.get(5)?,
            username: row.get(6)?,
            password: row.get(7)?,
            auto: row.get(8)?,
            available: row.get(9)?,
            last_date: row.get(10)?,
            bank: [
                row.get(11)?,
                row.get(12)?,
                row.get(13)?,
                row.get(14)?,
                row.get(15)?,
                row.get(16)?,
                row.get(17)?,
                row.get(18)?,
                row.get(19)?,
            ],
        })
    }

    fn into_account(self) -> Result<Account> {
        let [
            description,
            ofx_id,
            ofx_org,
            ofx_url,
            ofx_version,
            client_uid,
            routing_number,
            app_id,
            app_version,
        ] = self.bank;

        let bank = Bank {
            id: parse_uuid(&self.bank_id)?,
            description,
            ofx_id,
            ofx_org,
            ofx_url,
            ofx_version,
            client_uid,
            routing_number,
            app_id,
            app_version,
        };

        let mut account = Account::new(
            parse_uuid(&self.id)?,
            self.name,
            self.number,
            AccountType::from_str(&self.account_type)?,
            bank,
        );
        account.balance = parse_decimal(&self.balance)?;
        account.auto = self.auto;
        account.available = self.available;
        account.last_date = self.last_date;
        if let (Some(username), Some(password)) = (self.username, self.password) {
            account.credentials = Some(Credentials::new(username, password));
        }
        Ok(account)
    }
}

struct TransactionRow {
    id: String,
    account_id: String,
    amount: String,
    posted_at: String,
    description: String,
    kind: String,
    is_notified: bool,
    ori_type: Option<String>,
    ori_amount: Option<String>,
    ori_name: Option<String>,
    ori_memo: Option<String>,
    ori_postdate: Option<String>,
    ori_fitid: Option<String>,
    created_at: String,
}

impl TransactionRow {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            amount: row.get(2)?,
            posted_at: row.get(3)?,
            description: row.get(4)?,
            kind: row.get(5)?,
            is_notified: row.get(6)?,
            ori_type: row.get(7)?,
            ori_amount: row.get(8)?,
            ori_name: row.get(9)?,
            ori_memo: row.get(10)?,
            ori_postdate: row.get(11)?,
            ori_fitid: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        let mut tx = Transaction::new(
            parse_uuid(&self.id)?,
            parse_uuid(&self.account_id)?,
            parse_decimal(&self.amount)?,
            parse_naive_datetime(&self.posted_at)?,
        );
        tx.description = self.description;
        tx.kind = TransactionKind::from_code(&self.kind);
        tx.is_notified = self.is_notified;
        tx.ori_type = self.ori_type.unwrap_or_default();
        tx.ori_amount = self.ori_amount.unwrap_or_default();
        tx.ori_name = self.ori_name.unwrap_or_default();
        tx.ori_memo = self.ori_memo;
        tx.ori_postdate = self.ori_postdate.unwrap_or_default();
        tx.ori_fitid = self.ori_fitid.unwrap_or_default();
        tx.created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::database(format!("created_at '{}': {}", self.created_at, e)))?;
        Ok(tx)
    }
}

// Helper functions

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("invalid id '{}': {}", s, e)))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s.trim())
        .map_err(|e| Error::database(format!("invalid decimal '{}': {}", s, e)))
}

fn parse_naive_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| Error::database(format!("invalid timestamp '{}': {}", s, e)))
}
