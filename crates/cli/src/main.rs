//! Caravel CLI: inspect, resume and run BTC/XMR swaps.
//!
//! Subcommands: list, history, resume, buy, serve.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bitcoin::Amount;
use clap::{Parser, Subcommand};
use protocol::{FileStore, Swap, SwapId, SwapStore};
use tracing_subscriber::EnvFilter;

mod config;
mod swap;
mod tcp;

use config::Config;

#[derive(Parser)]
#[command(name = "caravel", version, about = "BTC/XMR atomic swaps")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "caravel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List recorded swaps and their latest state
    List {
        /// Only show swaps that have not reached a terminal state
        #[arg(long)]
        incomplete: bool,
    },

    /// Print every recorded transition of a swap
    History { swap_id: SwapId },

    /// Continue a swap from its latest recorded state
    Resume { swap_id: SwapId },

    /// Buy XMR for BTC from a maker
    Buy {
        /// Maker address, host:port
        #[arg(long)]
        peer: String,
        #[arg(long)]
        btc_sats: u64,
    },

    /// Sell XMR for BTC to incoming takers
    Serve {
        #[arg(long, default_value = "0.0.0.0:9939")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let store: Arc<dyn SwapStore> = Arc::new(
        FileStore::open(config.store_dir())
            .with_context(|| format!("failed to open {}", config.store_dir().display()))?,
    );

    match cli.command {
        Cmd::List { incomplete } => list(store.as_ref(), incomplete)?,
        Cmd::History { swap_id } => history(store.as_ref(), swap_id)?,
        Cmd::Resume { swap_id } => swap::resume(&config, store, swap_id).await?,
        Cmd::Buy { peer, btc_sats } => {
            if btc_sats == 0 {
                bail!("--btc-sats must be greater than zero");
            }
            swap::buy(&config, store, &peer, Amount::from_sat(btc_sats)).await?;
        }
        Cmd::Serve { listen } => swap::serve(&config, store, &listen).await?,
    }

    Ok(())
}

fn list(store: &dyn SwapStore, incomplete: bool) -> Result<()> {
    let swaps: Vec<(SwapId, Swap)> = if incomplete {
        store.list_incomplete()?
    } else {
        store
            .swap_ids()?
            .into_iter()
            .map(|id| Ok((id, store.load_latest(id)?)))
            .collect::<Result<_>>()?
    };

    if swaps.is_empty() {
        println!("No swaps recorded.");
        return Ok(());
    }
    println!("{:<36}  {:<5}  {:<10}  STATE", "SWAP", "ROLE", "PHASE");
    for (id, swap) in swaps {
        println!(
            "{:<36}  {:<5}  {:<10}  {}",
            id.to_string(),
            swap.role().to_string(),
            swap.phase().to_string(),
            swap.name()
        );
    }
    Ok(())
}

fn history(store: &dyn SwapStore, swap_id: SwapId) -> Result<()> {
    let transitions = store.history(swap_id)?;
    if transitions.is_empty() {
        bail!("no swap {swap_id} recorded");
    }
    let role = transitions[0].swap.role();
    println!("Swap {swap_id} ({role})");
    for transition in transitions {
        println!(
            "  {:>10}  {:<10}  {}",
            transition.recorded_at,
            transition.phase.to_string(),
            transition.swap.name()
        );
    }
    Ok(())
}
