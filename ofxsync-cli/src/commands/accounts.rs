//! Accounts command - show stored accounts and where their sync stands

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::get_context;
use crate::output;

#[derive(Serialize)]
struct AccountRow {
    id: String,
    name: String,
    number: String,
    account_type: String,
    institution: Option<String>,
    balance: String,
    auto_sync: bool,
    available: bool,
    last_date: Option<String>,
    transactions: u64,
}

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let accounts = ctx.repository.get_accounts()?;

    let mut rows = Vec::with_capacity(accounts.len());
    for account in &accounts {
        rows.push(AccountRow {
            id: account.id.to_string(),
            name: account.name.clone(),
            number: account.masked_number(),
            account_type: account.account_type.to_string(),
            institution: account
                .bank
                .description
                .clone()
                .or_else(|| account.bank.org().map(str::to_string)),
            balance: account.balance.to_string(),
            auto_sync: account.auto,
            available: account.available,
            last_date: account.last_date.clone(),
            transactions: ctx.repository.transaction_count(account.id)?,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        output::warning("No accounts stored.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec![
        "Name",
        "Number",
        "Type",
        "Institution",
        "Balance",
        "Last statement",
        "Txns",
        "Sync",
    ]);

    for row in rows {
        let sync = if row.available && row.auto_sync {
            "auto".green().to_string()
        } else if row.available {
            "manual".yellow().to_string()
        } else {
            "off".dimmed().to_string()
        };
        table.add_row(vec![
            row.name,
            format!("...{}", row.number),
            row.account_type,
            row.institution.unwrap_or_default(),
            row.balance,
            row.last_date.unwrap_or_else(|| "never".to_string()),
            row.transactions.to_string(),
            sync,
        ]);
    }

    println!("{}", table);
    Ok(())
}
