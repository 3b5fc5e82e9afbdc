//! Sync command - run one pass over every eligible account

use anyhow::{Context, Result};
use colored::Colorize;

use super::get_context;
use crate::output;

/// Per-account failures are part of the output; only a pass that cannot run
/// returns an error
pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    if let Some(logging) = &ctx.logging {
        let _ = logging.log_command("sync");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(ctx.sync_service.sync())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.results.is_empty() {
        output::warning("No eligible accounts. Enable auto sync on an account first.");
        return Ok(());
    }

    for account in &result.results {
        match &account.error {
            Some(failure) => {
                println!(
                    "{} {} [{}] {}",
                    "Failed:".red(),
                    account.name,
                    failure.kind,
                    failure.message
                );
            }
            None => {
                println!("{} {}", "Synced:".green(), account.name);
                println!("  New transactions: {}", account.new_transactions);
                if account.skipped > 0 {
                    println!("  Skipped: {} (already stored)", account.skipped);
                }
                if let Some(balance) = account.balance {
                    println!("  Balance: {}", balance);
                }
                if let Some(last_date) = &account.last_date {
                    println!("  Statement end: {}", last_date);
                }
            }
        }
    }

    println!();
    let summary = format!(
        "{} of {} accounts synced, {} new transactions",
        result.totals.succeeded, result.totals.accounts, result.totals.new_transactions
    );
    if result.totals.failed == 0 {
        output::success(&summary);
    } else {
        output::warning(&format!("{} ({} failed)", summary, result.totals.failed));
    }

    Ok(())
}
