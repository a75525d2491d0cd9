use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pay_ledger::csv::{read_commands, write_accounts, write_payments};
use pay_ledger::{AccountId, Cursor, Ledger, LedgerConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Payment ledger backed by SQLite. Configured through `LEDGER_*`
/// environment variables.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Apply commands from a csv file, then print every account balance
    Run { commands: PathBuf },
    /// Print one account balance
    Balance { id: AccountId },
    /// Print one page of an account's payment history
    History {
        id: AccountId,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Cursor returned by a previous page, or an RFC 3339 timestamp
        #[arg(long)]
        cursor: Option<Cursor>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let ledger = match Ledger::open(&config) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(path = %config.db_path.display(), "failed to open ledger: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        CliCommand::Run { commands } => run(&ledger, &config, commands).await,
        CliCommand::Balance { id } => balance(&ledger, &config, id).await,
        CliCommand::History { id, limit, cursor } => {
            history(&ledger, &config, id, limit, cursor).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn run(ledger: &Ledger, config: &LedgerConfig, path: PathBuf) -> CliResult {
    if path.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %path.display(), "input file seems to not be a csv file");
    }

    let commands = read_commands(&path, config.amount_scale)?;
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    // csv reading is blocking; feed the ledger from a dedicated thread
    let reader = tokio::task::spawn_blocking(move || {
        for result in commands {
            match result {
                Ok(command) => {
                    if tx_sender.blocking_send(command).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(tx_receiver)).await;
    reader.await?;

    let accounts = ledger.accounts().await?;
    write_accounts(io::stdout().lock(), &accounts, config.amount_scale)?;
    Ok(())
}

async fn balance(ledger: &Ledger, config: &LedgerConfig, id: AccountId) -> CliResult {
    let account = ledger.account(id).await?;
    write_accounts(io::stdout().lock(), [&account], config.amount_scale)?;
    Ok(())
}

async fn history(
    ledger: &Ledger,
    config: &LedgerConfig,
    id: AccountId,
    limit: i64,
    cursor: Option<Cursor>,
) -> CliResult {
    let page = ledger.history(id, limit, cursor).await?;
    write_payments(io::stdout().lock(), &page.items, config.amount_scale)?;
    match page.oldest_timestamp {
        Some(next) => eprintln!("next cursor: {next}"),
        None => eprintln!("end of history"),
    }
    Ok(())
}
