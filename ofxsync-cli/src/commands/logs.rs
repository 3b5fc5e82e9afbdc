//! Logs command - view and manage the event log

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::get_logging_service;
use crate::output::{self, format_size, format_timestamp};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent log entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: LogsCommands) -> Result<()> {
    let service = get_logging_service()?;

    match command {
        LogsCommands::List { limit, errors, json } => {
            let entries = if errors {
                service.get_errors(limit)?
            } else {
                service.get_recent(limit)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if entries.is_empty() {
                println!("No log entries found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Time", "Entry", "Event", "Account", "Added", "Error"]);

            for entry in entries {
                let error = match (&entry.error_kind, &entry.error_message) {
                    (Some(kind), Some(message)) => {
                        format!("{}: {}", kind, message).red().to_string()
                    }
                    (Some(kind), None) => kind.red().to_string(),
                    (None, Some(message)) => message.red().to_string(),
                    (None, None) => String::new(),
                };

                table.add_row(vec![
                    format_timestamp(entry.timestamp),
                    entry.entry_point,
                    entry
                        .command
                        .map_or(entry.event.clone(), |c| format!("{} ({})", entry.event, c)),
                    entry.account_id.unwrap_or_default(),
                    entry.transactions_added.map(|n| n.to_string()).unwrap_or_default(),
                    error,
                ]);
            }

            println!("{}", table);
        }
        LogsCommands::Clear { older_than_days, json } => {
            let deleted = service.delete_older_than_days(older_than_days)?;

            if json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                println!("Deleted {} log entries", deleted);
            }
        }
        LogsCommands::Stats { json } => {
            let total = service.count()?;
            let errors = service.get_errors(1000)?.len();
            let db_path = service.db_path().to_path_buf();
            let size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "total_entries": total,
                        "error_count": errors,
                        "database_path": db_path.to_string_lossy(),
                        "database_size_bytes": size_bytes
                    })
                );
            } else {
                println!("{}", "Log Statistics".bold());
                println!("  Total entries: {}", total);
                println!("  Errors: {}", errors);
                println!("  Database: {}", db_path.display());
                println!("  Size: {}", format_size(size_bytes));
            }
        }
    }

    Ok(())
}
