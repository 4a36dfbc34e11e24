#![forbid(unsafe_code)]
//! thorload command line: inspect derived accounts or run a funding and
//! block-watching simulation against the in-memory chain.

use alloy_primitives::U256;
use clap::{Parser, Subcommand};
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thorload::accounts::derive_accounts;
use thorload::chain::memory::InMemoryChain;
use thorload::client::Client;
use thorload::config::{load_config, load_config_from, DEFAULT_ACCOUNTS, DEFAULT_MNEMONIC};
use thorload::error::LoadError;
use thorload::metrics::{ChannelSink, MetricSink};
use thorload::session::{Session, SessionConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// 1 VET / 1 VTHO in base units.
const DEFAULT_AMOUNT: &str = "0xde0b6b3a7640000";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the addresses derived from a mnemonic
    Accounts {
        #[arg(long, default_value = DEFAULT_MNEMONIC)]
        mnemonic: String,
        #[arg(long, default_value_t = DEFAULT_ACCOUNTS)]
        count: usize,
    },
    /// Funds accounts and watches blocks on an in-memory chain
    Simulate {
        /// Config file (defaults to ./thorload.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Clients sharing the endpoint
        #[arg(long, default_value_t = 3)]
        clients: usize,
        /// Accounts per client (overrides the config file)
        #[arg(long)]
        accounts: Option<usize>,
        /// First recipient index
        #[arg(long)]
        start: Option<usize>,
        /// Amount of each asset per recipient, base-16
        #[arg(long, default_value = DEFAULT_AMOUNT)]
        amount: String,
        /// How long to watch blocks after funding
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Accounts { mnemonic, count } => accounts(&mnemonic, count)?,
        Commands::Simulate {
            config,
            clients,
            accounts,
            start,
            amount,
            seconds,
        } => simulate(config, clients, accounts, start, &amount, seconds).await?,
    }

    Ok(())
}

fn accounts(mnemonic: &str, count: usize) -> Result<(), LoadError> {
    println!("{}", "Derived accounts".bright_cyan().bold());
    for account in derive_accounts(mnemonic, count)? {
        println!("  {:>3}  {}", account.index, account.address_hex().bright_yellow());
    }
    Ok(())
}

async fn simulate(
    config_path: Option<PathBuf>,
    clients: usize,
    accounts: Option<usize>,
    start: Option<usize>,
    amount: &str,
    seconds: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(accounts) = accounts {
        config.client.accounts = accounts;
    }
    config.client = config.client.with_defaults();
    config.validate()?;

    let start = start.unwrap_or_else(|| (config.client.accounts / 2).max(1));
    let clients = clients.max(1);

    println!("{}", "thorload simulation".bright_cyan().bold());
    println!("  endpoint: {}", config.client.url.bright_yellow());
    println!(
        "  clients: {}  accounts: {}  start: {}",
        clients, config.client.accounts, start
    );

    // Pre-fund the funder pool, as a solo node does from genesis.
    let chain = Arc::new(InMemoryChain::new(config.client.url.clone()));
    let genesis_balance = U256::from(10u64).pow(U256::from(27u64));
    for account in derive_accounts(&config.client.mnemonic, start.min(config.client.accounts))? {
        chain.credit(account.address, genesis_balance, genesis_balance);
    }

    let (sink, mut samples) = ChannelSink::new(config.sink.capacity);
    let sink = Arc::new(sink);
    let collector = tokio::spawn(async move {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        while let Some(group) = samples.recv().await {
            for sample in group {
                *counts.entry(sample.metric.name).or_default() += 1;
            }
        }
        counts
    });

    let producer_cancel = CancellationToken::new();
    let producer = chain.spawn_producer(Duration::from_secs(1), producer_cancel.clone());

    let session = Session::new(
        SessionConfig::from_config(&config),
        Arc::clone(&sink) as Arc<dyn MetricSink>,
    );
    let mut connected = Vec::with_capacity(clients);
    for _ in 0..clients {
        connected.push(Client::connect(config.client.clone(), &chain, &session, &config.funding)?);
    }

    println!("{}", "Funding...".bright_cyan());
    match connected[0].fund(start, amount).await {
        Ok(report) => {
            for outcome in &report.outcomes {
                println!(
                    "  funder {:>3}  {}  {}/{} batches",
                    outcome.funder,
                    thorload::crypto::address_to_hex(&outcome.address),
                    outcome.batches_confirmed,
                    outcome.batches_total
                );
            }
            println!(
                "{} {} clauses in {} batches",
                "Funded:".green().bold(),
                report.clauses_confirmed(),
                report.batches_confirmed()
            );
        }
        Err(LoadError::Funding(failure)) => {
            for outcome in &failure.report.outcomes {
                let status = match &outcome.error {
                    Some(e) => e.to_string().red(),
                    None => "ok".green(),
                };
                println!(
                    "  funder {:>3}  {}/{} batches  {}",
                    outcome.funder, outcome.batches_confirmed, outcome.batches_total, status
                );
            }
            println!("{} {}", "Funding incomplete:".red().bold(), failure);
        }
        Err(e) => println!("{} {}", "Funding failed:".red().bold(), e),
    }

    println!("{}", format!("Watching blocks for {}s...", seconds).bright_cyan());
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let reports = session.shutdown().await;
    producer_cancel.cancel();
    producer.await?;

    let head = chain.head();
    let (delivered, dropped) = (sink.delivered(), sink.dropped());
    drop(connected);
    drop(session);
    drop(sink);
    let counts = collector.await?;

    println!("{}", "Pollers".bright_cyan().bold());
    for report in &reports {
        println!(
            "  {}  ticks {}  emitted {}  duplicates {}  read failures {}",
            report.endpoint,
            report.stats.ticks,
            report.stats.emitted,
            report.stats.duplicates,
            report.stats.read_failures
        );
    }

    println!("{}", "Samples".bright_cyan().bold());
    for (name, count) in &counts {
        println!("  {:<24} {}", name, count);
    }
    println!(
        "  delivered {}  dropped {}  chain head {}",
        delivered, dropped, head.number
    );

    Ok(())
}
