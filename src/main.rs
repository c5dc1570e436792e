// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use defi_chain_core::{config::load_config, utils::setup_logging, ChainEngine};
use log::{info, warn};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chain-core", about = "Solana RPC execution core operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every configured endpoint once and print its health.
    Health,
    /// Decode a pool account and print its reserves and price.
    Pool {
        /// Pool account address.
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();
    // Before the config loads, so its parse warnings are not lost.
    setup_logging(std::env::var("LOG_LEVEL").ok().as_deref())
        .context("failed to initialize logging")?;
    let config = load_config().context("failed to load configuration")?;
    info!("🚀 chain-core starting");

    let engine = ChainEngine::new(Arc::clone(&config)).context("failed to start engine")?;
    let outcome = run(&engine, cli.command).await;
    engine.shutdown().await;
    outcome
}

async fn run(engine: &ChainEngine, command: Command) -> Result<()> {
    match command {
        Command::Health => {
            engine.pool().check_health().await;
            for snapshot in engine.pool().all_endpoint_health() {
                println!("{}", snapshot);
            }
            println!("{}", engine.stats());
        }
        Command::Pool { address } => {
            let address = Pubkey::from_str(&address)
                .with_context(|| format!("invalid pool address {}", address))?;
            match engine.pools().get_pool(&address).await? {
                Some(state) => {
                    println!("{} pool {}", state.dex, state.address);
                    println!("  mints    {} / {}", state.mint_a, state.mint_b);
                    println!("  reserves {} / {}", state.reserve_a, state.reserve_b);
                    println!("  decimals {} / {}", state.decimals_a, state.decimals_b);
                    println!("  fee      {:.2} bps", state.fee_bps());
                    match state.price() {
                        Some(price) => println!("  price    {:.9}", price),
                        None => println!("  price    n/a (empty reserve)"),
                    }
                }
                None => warn!("⚠️ {} is not a supported pool", address),
            }
        }
    }
    Ok(())
}
