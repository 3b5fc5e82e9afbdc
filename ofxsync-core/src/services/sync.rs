//! Sync service - downloads statements and commits new transactions
//!
//! One pass walks every eligible account: build a statement request, send
//! it, parse the response, turn records into transactions, and commit them
//! together with the new cursor and balance. Accounts are isolated: a failure
//! is reported for that account and the pass moves on.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{OfxSettings, SyncSettings};
use crate::domain::result::{Error, ErrorKind, Result};
use crate::domain::{
    Account, Credentials, LogEvent, Transaction, TransactionKind, ACCOUNT_FAILED,
    ACCOUNT_SYNCED, SYNC_COMPLETED, SYNC_STARTED,
};
use crate::ofx::{OfxResponse, RequestBuilder, StatementRecord};
use crate::ports::{
    AccountCommit, CommitOutcome, EventSink, SyncStore, TaggingPolicy, Transport,
};

/// Why an account was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for SyncFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome for one account
#[derive(Debug, Clone, Serialize)]
pub struct AccountSyncResult {
    pub account_id: Uuid,
    pub name: String,
    pub new_transactions: usize,
    /// Records dropped as already stored
    pub skipped: usize,
    /// Balance after the sync, `None` when nothing was committed
    pub balance: Option<Decimal>,
    /// Cursor after the sync, `None` when nothing was committed
    pub last_date: Option<String>,
    pub error: Option<SyncFailure>,
}

impl AccountSyncResult {
    fn synced(
        account: &Account,
        outcome: CommitOutcome,
        balance: Decimal,
        last_date: String,
    ) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            new_transactions: outcome.inserted,
            skipped: outcome.skipped,
            balance: Some(balance),
            last_date: Some(last_date),
            error: None,
        }
    }

    fn failed(account: &Account, err: &Error) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            new_transactions: 0,
            skipped: 0,
            balance: None,
            last_date: None,
            error: Some(err.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_transactions: usize,
    pub skipped: usize,
}

/// Outcome of a whole pass, accounts in the order they were read
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub results: Vec<AccountSyncResult>,
    pub totals: SyncTotals,
}

impl SyncResult {
    fn new(results: Vec<AccountSyncResult>) -> Self {
        let mut totals = SyncTotals {
            accounts: results.len(),
            ..Default::default()
        };
        for result in &results {
            if result.is_success() {
                totals.succeeded += 1;
            } else {
                totals.failed += 1;
            }
            totals.new_transactions += result.new_transactions;
            totals.skipped += result.skipped;
        }
        Self { results, totals }
    }
}

/// Sync service
pub struct SyncService {
    store: Arc<dyn SyncStore>,
    transport: Arc<dyn Transport>,
    tagging: Arc<dyn TaggingPolicy>,
    events: Arc<dyn EventSink>,
    ofx: OfxSettings,
    settings: SyncSettings,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn SyncStore>,
        transport: Arc<dyn Transport>,
        tagging: Arc<dyn TaggingPolicy>,
        events: Arc<dyn EventSink>,
        ofx: OfxSettings,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            transport,
            tagging,
            events,
            ofx,
            settings,
        }
    }

    /// Run one pass over every eligible account
    ///
    /// Fails only when the account list cannot be read; per-account
    /// failures are reported inside the result. Credentials are moved out of
    /// the account list before any task starts and dropped once the request
    /// has been sent.
    pub async fn sync(&self) -> Result<SyncResult> {
        let mut accounts = self.store.eligible_accounts().await?;
        info!(accounts = accounts.len(), "sync pass started");
        self.events
            .record(LogEvent::new(SYNC_STARTED).with_count(accounts.len() as u64));

        let pass = Arc::new(SyncPass {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            tagging: Arc::clone(&self.tagging),
            builder: RequestBuilder::new(self.ofx.clone()),
            settings: self.settings.clone(),
            deadline: Instant::now() + self.settings.pass_timeout(),
        });
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        let mut tasks = JoinSet::new();
        for (index, account) in accounts.iter_mut().enumerate() {
            let credentials = account.credentials.take();
            let account = account.clone();
            let pass = Arc::clone(&pass);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let outcome = pass.run_with_deadline(&account, credentials, &permits).await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<AccountSyncResult>>> =
            accounts.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!("account task failed: {}", e),
            }
        }

        let mut results = Vec::with_capacity(accounts.len());
        for (account, outcome) in accounts.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                Err(Error::Io(std::io::Error::other("account task did not finish")))
            });
            let result = match outcome {
                Ok(result) => {
                    info!(
                        account_id = %account.id,
                        inserted = result.new_transactions,
                        skipped = result.skipped,
                        "account synced"
                    );
                    self.events.record(
                        LogEvent::new(ACCOUNT_SYNCED)
                            .with_account(account.id)
                            .with_count(result.new_transactions as u64),
                    );
                    result
                }
                Err(e) => {
                    warn!(
                        account_id = %account.id,
                        kind = %e.kind(),
                        "account sync failed: {}",
                        e
                    );
                    self.events.record(
                        LogEvent::new(ACCOUNT_FAILED)
                            .with_account(account.id)
                            .with_error(&e),
                    );
                    AccountSyncResult::failed(account, &e)
                }
            };
            results.push(result);
        }

        let result = SyncResult::new(results);
        info!(
            succeeded = result.totals.succeeded,
            failed = result.totals.failed,
            new_transactions = result.totals.new_transactions,
            "sync pass completed"
        );
        self.events.record(
            LogEvent::new(SYNC_COMPLETED).with_count(result.totals.new_transactions as u64),
        );
        Ok(result)
    }
}

/// State shared by the account tasks of one pass
struct SyncPass {
    store: Arc<dyn SyncStore>,
    transport: Arc<dyn Transport>,
    tagging: Arc<dyn TaggingPolicy>,
    builder: RequestBuilder,
    settings: SyncSettings,
    deadline: Instant,
}

impl SyncPass {
    async fn run_with_deadline(
        &self,
        account: &Account,
        credentials: Option<Credentials>,
        permits: &Semaphore,
    ) -> Result<AccountSyncResult> {
        let work = async {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| Error::Timeout("sync pass cancelled".to_string()))?;
            self.sync_account(account, credentials).await
        };

        match tokio::time::timeout_at(self.deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(format!(
                "sync pass deadline of {}s exceeded",
                self.settings.pass_timeout_secs
            ))),
        }
    }

    async fn sync_account(
        &self,
        account: &Account,
        credentials: Option<Credentials>,
    ) -> Result<AccountSyncResult> {
        let body = self.fetch_statement(account, credentials).await?;
        let statement = OfxResponse::parse(&body).parse_statement()?;

        let transactions = statement
            .transactions
            .iter()
            .map(|record| self.to_transaction(account, record))
            .collect::<Result<Vec<_>>>()?;

        let commit = AccountCommit {
            account_id: account.id,
            last_date: statement.end_date.clone(),
            balance: statement.balance,
            transactions,
            dedupe_by_fitid: self.settings.dedupe_by_fitid,
        };
        let outcome = self.store.commit_account_sync(&commit).await?;

        Ok(AccountSyncResult::synced(
            account,
            outcome,
            statement.balance,
            statement.end_date,
        ))
    }

    /// Send the statement request, retrying transport failures with backoff
    ///
    /// Every attempt builds a fresh document, so `TRNUID` and `CLTCOOKIE`
    /// never repeat. Takes the credentials by value; they are dropped when
    /// this returns, before the response is parsed.
    async fn fetch_statement(
        &self,
        account: &Account,
        credentials: Option<Credentials>,
    ) -> Result<String> {
        let credentials = credentials
            .ok_or_else(|| Error::config(format!("account {} has no credentials", account.id)))?;
        let url = account.bank.endpoint().ok_or_else(|| {
            Error::config(format!("bank {} has no OFX endpoint", account.bank.id))
        })?;

        let mut attempt: u32 = 0;
        loop {
            // Wipes this copy only; the transport may keep its own buffer
            let document =
                Zeroizing::new(self.builder.signed_statement_request(account, &credentials)?);

            let budget = self
                .deadline
                .saturating_duration_since(Instant::now())
                .min(self.settings.request_timeout());
            debug!(
                account_id = %account.id,
                attempt = attempt + 1,
                bytes = document.len(),
                "sending statement request"
            );

            let request = self.transport.send(url, &document);
            let sent = match tokio::time::timeout(budget, request).await {
                Ok(sent) => sent,
                Err(_) => Err(Error::Timeout(format!(
                    "no response within {}ms",
                    budget.as_millis()
                ))),
            };

            match sent {
                Ok(body) => {
                    debug!(
                        account_id = %account.id,
                        bytes = body.len(),
                        "statement response received"
                    );
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.settings.retry_attempts => {
                    let delay = self.settings.backoff(attempt);
                    if Instant::now() + delay >= self.deadline {
                        return Err(e);
                    }
                    warn!(
                        account_id = %account.id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "statement request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn to_transaction(&self, account: &Account, record: &StatementRecord) -> Result<Transaction> {
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            account.id,
            record.amount_value()?,
            record.posted_at()?,
        );
        tx.description = record.description();
        tx.kind = TransactionKind::from_code(&record.trn_type);
        tx.ori_type = record.trn_type.clone();
        tx.ori_amount = record.amount.clone();
        tx.ori_name = record.name.clone();
        tx.ori_memo = record.memo.clone();
        tx.ori_postdate = record.posted.clone();
        tx.ori_fitid = record.fitid.clone();
        tx.tags = self.tagging.tags_for(account, &tx);
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, Bank};
    use crate::ports::MemoryEventSink;
    use crate::services::DefaultTags;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    // === Mock ports ===

    #[derive(Default)]
    struct MemoryStore {
        accounts: Vec<Account>,
        commits: Mutex<Vec<AccountCommit>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl SyncStore for MemoryStore {
        async fn eligible_accounts(&self) -> Result<Vec<Account>> {
            Ok(self.accounts.iter().filter(|a| a.is_eligible()).cloned().collect())
        }

        async fn commit_account_sync(&self, commit: &AccountCommit) -> Result<CommitOutcome> {
            if self.fail_commit {
                return Err(Error::database("disk full"));
            }
            self.commits.lock().unwrap().push(commit.clone());
            Ok(CommitOutcome {
                inserted: commit.transactions.len(),
                skipped: 0,
            })
        }
    }

    #[derive(Clone)]
    enum Reply {
        Body(String),
        Refused,
        Hang,
    }

    /// Replies per URL; the last reply repeats
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        documents: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn script(self, url: &str, replies: Vec<Reply>) -> Self {
            self.replies.lock().unwrap().insert(url.to_string(), replies.into());
            self
        }

        fn documents(&self) -> Vec<String> {
            self.documents.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, url: &str, document: &str) -> Result<String> {
            self.documents.lock().unwrap().push(document.to_string());
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let queue = replies.get_mut(url).expect("unscripted url");
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                }
            };
            match reply {
                Reply::Body(body) => Ok(body),
                Reply::Refused => Err(Error::Network("connection refused".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Error::Network("unreachable".into()))
                }
            }
        }
    }

    /// Records whether each account view handed to tagging still held credentials
    #[derive(Default)]
    struct CredentialWitness {
        seen: Mutex<Vec<bool>>,
    }

    impl TaggingPolicy for CredentialWitness {
        fn tags_for(&self, account: &Account, _transaction: &Transaction) -> Vec<String> {
            self.seen.lock().unwrap().push(account.credentials.is_some());
            Vec::new()
        }
    }

    // === Fixtures ===

    fn account(name: &str, account_type: AccountType) -> Account {
        let url = format!("https://{}.test/ofx", name.to_lowercase());
        let mut bank = Bank::new(Uuid::new_v4(), "ORG", url);
        bank.routing_number = Some("021000021".to_string());
        Account::new(Uuid::new_v4(), name, "000123", account_type, bank)
            .with_credentials("user", "pass")
    }

    fn url_of(account: &Account) -> String {
        account.bank.ofx_url.clone().unwrap()
    }

    fn statement(end: &str, balance: &str, records: &[(&str, &str, &str)]) -> String {
        let mut body = String::from(
            "OFXHEADER:100\r\n\r\n<OFX><SIGNONMSGSRSV1><SONRS>\
             <STATUS><CODE>0<SEVERITY>INFO</STATUS></SONRS></SIGNONMSGSRSV1>",
        );
        body.push_str(
            "<BANKMSGSRSV1><STMTTRNRS><STATUS><CODE>0<SEVERITY>INFO</STATUS>\
             <STMTRS><BANKTRANLIST>",
        );
        body.push_str(&format!("<DTSTART>19700101<DTEND>{}", end));
        for (fitid, name, memo) in records {
            body.push_str(&format!(
                "<STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20230615120000.000[-5:EST]<TRNAMT>-10.00\
                 <FITID>{}<NAME>{}<MEMO>{}</STMTTRN>",
                fitid, name, memo
            ));
        }
        body.push_str(&format!(
            "</BANKTRANLIST><LEDGERBAL><BALAMT>{}</LEDGERBAL>\
             </STMTRS></STMTTRNRS></BANKMSGSRSV1></OFX>",
            balance
        ));
        body
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn service(
        store: Arc<MemoryStore>,
        transport: Arc<ScriptedTransport>,
        events: Arc<MemoryEventSink>,
        settings: SyncSettings,
    ) -> SyncService {
        SyncService::new(
            store,
            transport,
            Arc::new(DefaultTags::new(&["ofx".to_string()])),
            events,
            OfxSettings::default(),
            settings,
        )
    }

    #[tokio::test]
    async fn test_successful_account_commits_mapped_records() {
        let acct = account("Checking", AccountType::Checking);
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default().script(
            &url_of(&acct),
            vec![Reply::Body(statement("20230616", "99.50", &[("F1", "AMZN", "ORDER123")]))],
        ));
        let events = Arc::new(MemoryEventSink::new());

        let result = service(store.clone(), transport, events.clone(), settings())
            .sync()
            .await
            .unwrap();

        assert_eq!(result.totals.succeeded, 1);
        assert_eq!(result.results[0].new_transactions, 1);
        assert_eq!(result.results[0].last_date.as_deref(), Some("20230616"));
        assert_eq!(result.results[0].balance, Some(Decimal::new(9950, 2)));

        let commits = store.commits.lock().unwrap();
        let tx = &commits[0].transactions[0];
        assert_eq!(commits[0].last_date, "20230616");
        assert!(commits[0].dedupe_by_fitid);
        assert_eq!(tx.description, "AMZNORDER123");
        assert_eq!(tx.ori_name, "AMZN");
        assert_eq!(tx.ori_memo.as_deref(), Some("ORDER123"));
        assert_eq!(tx.kind, TransactionKind::Debit);
        assert_eq!(tx.amount, Decimal::new(-1000, 2));
        assert_eq!(tx.posted_at.to_string(), "2023-06-15 12:00:00");
        assert_eq!(tx.tags, vec!["ofx"]);
        assert!(!tx.is_notified);

        let names: Vec<_> = events.events().into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec![SYNC_STARTED, ACCOUNT_SYNCED, SYNC_COMPLETED]);
    }

    #[tokio::test]
    async fn test_credentials_are_released_after_the_request() {
        let acct = account("Checking", AccountType::Checking);
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            ..Default::default()
        });
        let records = [("F1", "AMZN", "ORDER1"), ("F2", "FUEL", "PUMP4")];
        let transport = Arc::new(ScriptedTransport::default().script(
            &url_of(&acct),
            vec![Reply::Body(statement("20230616", "5.00", &records))],
        ));
        let witness = Arc::new(CredentialWitness::default());
        let service = SyncService::new(
            store.clone(),
            transport.clone(),
            witness.clone(),
            Arc::new(MemoryEventSink::new()),
            OfxSettings::default(),
            settings(),
        );

        let result = service.sync().await.unwrap();

        assert!(result.results[0].is_success());
        assert!(transport.documents()[0].contains("<USERPASS>pass\r\n"));
        // Parsing and mapping only ever see the account without credentials
        assert_eq!(*witness.seen.lock().unwrap(), vec![false, false]);
        assert_eq!(store.commits.lock().unwrap().len(), 1);
        // The stored account keeps its login for the next pass
        assert!(store.accounts[0].credentials.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_are_retried_with_fresh_documents() {
        let acct = account("Savings", AccountType::Savings);
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default().script(
            &url_of(&acct),
            vec![
                Reply::Refused,
                Reply::Refused,
                Reply::Body(statement("20230616", "1.00", &[])),
            ],
        ));

        let events = Arc::new(MemoryEventSink::new());
        let result = service(store.clone(), transport.clone(), events, settings())
            .sync()
            .await
            .unwrap();

        assert!(result.results[0].is_success());
        let documents = transport.documents();
        assert_eq!(documents.len(), 3);
        assert!(documents[0].contains("<CLTCOOKIE>4\r\n"));
        assert!(documents[1].contains("<CLTCOOKIE>5\r\n"));
        assert!(documents[2].contains("<CLTCOOKIE>6\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_give_up_after_configured_attempts() {
        let acct = account("Savings", AccountType::Savings);
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            ..Default::default()
        });
        let transport = Arc::new(
            ScriptedTransport::default().script(&url_of(&acct), vec![Reply::Refused]),
        );

        let events = Arc::new(MemoryEventSink::new());
        let result = service(store.clone(), transport.clone(), events, settings())
            .sync()
            .await
            .unwrap();

        assert_eq!(transport.documents().len(), 3);
        assert_eq!(result.results[0].error.as_ref().unwrap().kind, ErrorKind::Network);
        assert!(store.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_rejected_are_not_retried() {
        let malformed = account("Alpha", AccountType::Checking);
        let rejected = account("Beta", AccountType::Credit);
        let store = Arc::new(MemoryStore {
            accounts: vec![malformed.clone(), rejected.clone()],
            ..Default::default()
        });
        let no_dtend = statement("X", "1.00", &[("F1", "A", "B")]).replace("<DTEND>X", "");
        let rejection = "<OFX><SIGNONMSGSRSV1><SONRS><STATUS><CODE>15500<SEVERITY>ERROR\
                         <MESSAGE>Signon invalid</STATUS></SONRS></SIGNONMSGSRSV1></OFX>";
        let transport = Arc::new(
            ScriptedTransport::default()
                .script(&url_of(&malformed), vec![Reply::Body(no_dtend)])
                .script(&url_of(&rejected), vec![Reply::Body(rejection.to_string())]),
        );
        let events = Arc::new(MemoryEventSink::new());

        let result = service(store.clone(), transport.clone(), events.clone(), settings())
            .sync()
            .await
            .unwrap();

        assert_eq!(transport.documents().len(), 2);
        assert_eq!(result.totals.failed, 2);
        assert_eq!(result.results[0].error.as_ref().unwrap().kind, ErrorKind::MalformedResponse);
        assert_eq!(result.results[1].error.as_ref().unwrap().kind, ErrorKind::Rejected);
        assert!(result.results[1].last_date.is_none());
        assert!(store.commits.lock().unwrap().is_empty());

        let failures: Vec<_> = events
            .events()
            .into_iter()
            .filter(|e| e.event == ACCOUNT_FAILED)
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].account_id, Some(malformed.id));
        assert_eq!(failures[1].error_kind.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn test_config_error_skips_transport() {
        let mut acct = account("NoCreds", AccountType::Checking);
        acct.credentials = None;
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default());

        let result = service(store, transport.clone(), Arc::new(MemoryEventSink::new()), settings())
            .sync()
            .await
            .unwrap();

        assert_eq!(result.results[0].error.as_ref().unwrap().kind, ErrorKind::Config);
        assert!(transport.documents().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_per_account() {
        let acct = account("Checking", AccountType::Checking);
        let store = Arc::new(MemoryStore {
            accounts: vec![acct.clone()],
            fail_commit: true,
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default().script(
            &url_of(&acct),
            vec![Reply::Body(statement("20230616", "1.00", &[]))],
        ));

        let result = service(store, transport, Arc::new(MemoryEventSink::new()), settings())
            .sync()
            .await
            .unwrap();
        assert_eq!(result.results[0].error.as_ref().unwrap().kind, ErrorKind::Database);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_account_times_out_others_commit() {
        let first = account("First", AccountType::Checking);
        let second = account("Second", AccountType::Checking);
        let third = account("Third", AccountType::Checking);
        let store = Arc::new(MemoryStore {
            accounts: vec![first.clone(), second.clone(), third.clone()],
            ..Default::default()
        });
        let transport = Arc::new(
            ScriptedTransport::default()
                .script(&url_of(&first), vec![Reply::Body(statement("D1", "1.00", &[]))])
                .script(&url_of(&second), vec![Reply::Hang])
                .script(&url_of(&third), vec![Reply::Body(statement("D3", "3.00", &[]))]),
        );
        let sync = SyncSettings {
            retry_attempts: 1,
            request_timeout_secs: 5,
            ..settings()
        };

        let result = service(store.clone(), transport, Arc::new(MemoryEventSink::new()), sync)
            .sync()
            .await
            .unwrap();

        assert!(result.results[0].is_success());
        assert_eq!(result.results[1].error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert!(result.results[2].is_success());

        let committed: Vec<_> = store
            .commits
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.account_id)
            .collect();
        assert_eq!(committed, vec![first.id, third.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_deadline_cancels_outstanding_accounts() {
        let slow = account("Slow", AccountType::Checking);
        let waiting = account("Waiting", AccountType::Checking);
        let store = Arc::new(MemoryStore {
            accounts: vec![slow.clone(), waiting.clone()],
            ..Default::default()
        });
        let transport = Arc::new(
            ScriptedTransport::default()
                .script(&url_of(&slow), vec![Reply::Hang])
                .script(&url_of(&waiting), vec![Reply::Body(statement("D", "1.00", &[]))]),
        );
        let sync = SyncSettings {
            pass_timeout_secs: 30,
            request_timeout_secs: 60,
            retry_attempts: 1,
            ..settings()
        };

        let result = service(store.clone(), transport, Arc::new(MemoryEventSink::new()), sync)
            .sync()
            .await
            .unwrap();

        assert_eq!(result.totals.failed, 2);
        assert!(result
            .results
            .iter()
            .all(|r| r.error.as_ref().unwrap().kind == ErrorKind::Timeout));
        assert!(store.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_account_order_under_concurrency() {
        let accounts: Vec<_> = ["A", "B", "C", "D"]
            .iter()
            .map(|n| account(n, AccountType::Savings))
            .collect();
        let mut transport = ScriptedTransport::default();
        for acct in &accounts {
            let reply = Reply::Body(statement("D", "1.00", &[]));
            transport = transport.script(&url_of(acct), vec![reply]);
        }
        let store = Arc::new(MemoryStore {
            accounts: accounts.clone(),
            ..Default::default()
        });
        let sync = SyncSettings {
            concurrency: 3,
            ..settings()
        };

        let result = service(store, Arc::new(transport), Arc::new(MemoryEventSink::new()), sync)
            .sync()
            .await
            .unwrap();

        let ids: Vec<_> = result.results.iter().map(|r| r.account_id).collect();
        let expected: Vec<_> = accounts.iter().map(|a| a.id).collect();
        assert_eq!(ids, expected);
        assert_eq!(result.totals.succeeded, 4);
    }

    #[tokio::test]
    async fn test_ineligible_accounts_are_not_polled() {
        let mut manual = account("Manual", AccountType::Checking);
        manual.auto = false;
        let store = Arc::new(MemoryStore {
            accounts: vec![manual],
            ..Default::default()
        });
        let transport = Arc::new(ScriptedTransport::default());

        let result = service(store, transport.clone(), Arc::new(MemoryEventSink::new()), settings())
            .sync()
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert!(transport.documents().is_empty());
    }
}
