#![forbid(unsafe_code)]

//! Command-line client wiring the HTTP gateways to the settlement engine.

mod config;
mod gateway;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use murk_core::{Address, Amount, Hash32};
use murk_ledger::LedgerService;
use murk_settle::{now_unix, OrderIntent, SettlementEngine};
use murk_tree::MerkleSync;

use config::Config;
use gateway::{ChainGateway, FillGateway, ProverGateway, RelayGateway};

#[derive(Parser, Debug)]
#[command(name = "murk", version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "murk.config.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deposit tokens into the pool, minting a fresh note.
    Deposit {
        #[arg(long)]
        asset: Address,
        #[arg(long)]
        amount: u128,
    },
    /// Place a limit order spending pool notes.
    Order {
        /// Raw order hash from the limit-order protocol.
        #[arg(long)]
        order_hash: Hash32,
        #[arg(long)]
        base_asset: Address,
        #[arg(long)]
        quote_asset: Address,
        #[arg(long)]
        base_amount: u128,
        #[arg(long)]
        min_quote_amount: u128,
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
        #[arg(long, default_value_t = 0.0)]
        diff_percentage: f64,
        /// Seconds until the order expires.
        #[arg(long, default_value_t = 3600)]
        expires_in: u64,
        /// Hex-encoded order payload for the fill service.
        #[arg(long)]
        payload: String,
        /// Hex-encoded order extension for the fill service.
        #[arg(long, default_value = "")]
        extension: String,
        /// Keep running and poll for fills until the order closes.
        #[arg(long)]
        watch: bool,
    },
    /// Cancel an open order by revealing its preimage.
    Cancel {
        #[arg(long)]
        id: Hash32,
    },
    /// Attempt one fill of an open order.
    Fill {
        #[arg(long)]
        id: Hash32,
    },
    /// Withdraw tokens from the pool to an external address.
    Withdraw {
        #[arg(long)]
        asset: Address,
        #[arg(long)]
        amount: u128,
        #[arg(long)]
        to: Address,
    },
    /// Re-run round two of a withdrawal stuck after its order confirmed.
    ResumeWithdraw {
        #[arg(long)]
        id: Hash32,
    },
    /// Show the spendable balance of an asset.
    Balance {
        #[arg(long)]
        asset: Address,
    },
    /// List all notes.
    Notes,
    /// List active orders and history.
    Orders,
    /// List withdrawals and their stages.
    Withdrawals,
    /// Synchronize the commitment tree and print its root.
    Sync,
}

fn decode_hex(label: &str, s: &str) -> Result<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| anyhow!("bad {label} hex: {e}"))
}

type Engine =
    SettlementEngine<ChainGateway, RelayGateway, FillGateway, ChainGateway, ProverGateway>;

fn build_engine(config: &Config) -> Result<Arc<Engine>> {
    let ledger = Arc::new(LedgerService::open(&config.ledger_path)?);
    let merkle = Arc::new(MerkleSync::new(ChainGateway::new(&config.chain_url)));
    Ok(Arc::new(SettlementEngine::new(
        ledger,
        merkle,
        RelayGateway::new(&config.relay_url),
        FillGateway::new(&config.fill_url),
        ChainGateway::new(&config.chain_url),
        ProverGateway::new(&config.prover_url),
        config.engine_config(),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let engine = build_engine(&config)?;

    match cli.command {
        Commands::Deposit { asset, amount } => {
            let record = engine.deposit(asset, Amount::from_units(amount)).await?;
            println!(
                "Deposited. commitment={} leaf={}",
                record.commitment,
                record.leaf_index.unwrap_or_default()
            );
        }
        Commands::Order {
            order_hash,
            base_asset,
            quote_asset,
            base_amount,
            min_quote_amount,
            rate,
            diff_percentage,
            expires_in,
            payload,
            extension,
            watch,
        } => {
            let intent = OrderIntent {
                order_hash,
                base_asset,
                quote_asset,
                base_amount: Amount::from_units(base_amount),
                min_quote_amount: Amount::from_units(min_quote_amount),
                rate,
                diff_percentage,
                expired_at: now_unix() + expires_in,
                fill_payload: decode_hex("payload", &payload)?,
                fill_extension: decode_hex("extension", &extension)?,
            };
            let id = engine.place_order(intent).await?;
            println!("Order placed: {id}");
            if watch {
                // Pick up any other open orders from a previous run too.
                engine.resume_fill_polling();
                info!("watching for fills; ctrl-c to stop");
                tokio::signal::ctrl_c().await?;
                engine.shutdown_pollers();
            }
        }
        Commands::Cancel { id } => {
            let tx = engine.cancel_order(&id).await?;
            println!("Cancelled in {tx}");
        }
        Commands::Fill { id } => {
            let outcome = engine.try_fill(&id).await?;
            println!("{outcome:?}");
        }
        Commands::Withdraw { asset, amount, to } => {
            let id = engine.withdraw(asset, Amount::from_units(amount), to).await?;
            println!("Withdrawal complete: {id}");
        }
        Commands::ResumeWithdraw { id } => {
            let tx = engine.resume_withdraw(&id).await?;
            println!("Withdrawal completed in {tx}");
        }
        Commands::Balance { asset } => {
            let balance = engine.ledger().balance_of(&asset)?;
            println!("Balance: {balance}");
        }
        Commands::Notes => {
            for record in engine.ledger().notes() {
                println!(
                    "{} asset={} amount={} leaf={:?} state={:?}",
                    record.commitment,
                    record.note.asset,
                    record.note.amount.units(),
                    record.leaf_index,
                    record.state,
                );
            }
        }
        Commands::Orders => {
            let (active, history) = engine.ledger().orders(now_unix());
            println!("Active:");
            for order in active {
                println!(
                    "  {} {} {}->{} amount={}",
                    order.id,
                    order.state.label(),
                    order.base_asset,
                    order.quote_asset,
                    order.base_amount.units(),
                );
            }
            println!("History:");
            for order in history {
                println!("  {} {}", order.id, order.state.label());
            }
        }
        Commands::Withdrawals => {
            for record in engine.ledger().withdrawals() {
                println!(
                    "{} asset={} amount={} stage={:?}",
                    record.id,
                    record.asset,
                    record.amount.units(),
                    record.stage,
                );
            }
        }
        Commands::Sync => {
            let merkle = MerkleSync::new(ChainGateway::new(&config.chain_url));
            let snapshot = merkle.sync().await?;
            println!("Synced {} leaves, root {}", snapshot.leaf_count(), snapshot.root());
        }
    }

    Ok(())
}
