use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use comit_swap_watch::swap::ledger::SwapLedger;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "swaps.sqlite3")]
    ledger_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a swap's current record by its lock transaction id.
    GetSwap {
        #[arg(long)]
        lock_txid: String,
    },
    /// Print the most recently detected swaps.
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

fn main() -> Result<()> {
    comit_swap_watch::logging::init().ok();
    let args = Args::parse();

    let ledger = SwapLedger::open(args.ledger_path).context("open swap ledger")?;

    match args.command {
        Command::GetSwap { lock_txid } => {
            let swap = ledger
                .get(&lock_txid)
                .context("get swap")?
                .with_context(|| format!("swap not found: {lock_txid}"))?;
            println!("{}", serde_json::to_string_pretty(&swap)?);
        }
        Command::Recent { limit } => {
            let swaps = ledger.recent_swaps(limit).context("list recent swaps")?;
            println!("{}", serde_json::to_string_pretty(&swaps)?);
        }
    }

    Ok(())
}
