mod commands;
mod config;

use clap::{Parser, Subcommand};
use rochambeau_core::{Clock, SystemClock};
use rochambeau_escrow::{CommitmentBinding, PayoutMode, WagerError};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rochambeau")]
#[command(about = "Rochambeau - commit-reveal rock/paper/scissors wagers")]
#[command(version)]
struct Cli {
    /// Data directory for the escrow ledger
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run with the clock fixed at this unix time
    #[arg(long, global = true)]
    at: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new escrow in the data directory
    Init {
        /// Owner (address or label)
        owner: String,
        /// Instance address mixed into commitments
        #[arg(long)]
        instance: Option<String>,
        /// Commission in satoshis
        #[arg(long, default_value_t = 10_000)]
        commission: u64,
        /// Maximum expiry delta in seconds
        #[arg(long, default_value_t = 600)]
        max_expiry: u64,
        /// Commitment binding (bettor, instance)
        #[arg(long, default_value = "bettor", value_parser = parse_binding)]
        binding: CommitmentBinding,
        /// Payout mode (pull, push)
        #[arg(long, default_value = "pull", value_parser = parse_payout)]
        payout: PayoutMode,
        /// Keep the original deadline when countering
        #[arg(long)]
        no_reveal_window: bool,
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Create a commitment for a hidden choice
    Commit {
        /// Bettor (address or label)
        bettor: String,
        /// rock, paper or scissors
        choice: String,
        /// Secret (hex encoded), random if omitted
        #[arg(long)]
        secret: Option<String>,
    },
    /// Place a wager under a commitment
    Place {
        /// Bettor (address or label)
        bettor: String,
        /// Wager ID from `commit`
        id: String,
        /// Opponent (address or label)
        opponent: String,
        /// Deposit in satoshis, commission included
        deposit: u64,
        /// Seconds until the wager expires
        #[arg(long, default_value_t = 600)]
        expiry: u64,
    },
    /// Counter a wager with a plaintext choice
    Counter {
        /// Opponent (address or label)
        opponent: String,
        /// Wager ID
        id: String,
        /// rock, paper or scissors
        choice: String,
        /// Deposit in satoshis, the exact price if omitted
        #[arg(long)]
        deposit: Option<u64>,
    },
    /// Reveal the bettor's choice and settle
    Verify {
        /// Bettor (address or label)
        bettor: String,
        /// Hand committed to
        choice: String,
        /// Secret (hex encoded)
        secret: String,
    },
    /// Reclaim an expired wager
    #[command(subcommand)]
    Reclaim(commands::ReclaimCommands),
    /// Withdraw a credited balance
    Withdraw {
        /// Party (address or label)
        party: String,
        /// Amount in satoshis, everything if omitted
        sats: Option<u64>,
    },
    #[command(flatten)]
    Admin(commands::AdminCommands),
    /// Show one wager
    Show {
        /// Wager ID
        id: String,
    },
    /// Show a party's withdrawable balance
    Balance {
        /// Party (address or label)
        party: String,
    },
    /// List wagers
    List {
        /// Include finished wagers
        #[arg(short, long)]
        all: bool,
    },
    /// Show escrow settings and totals
    Status,
}

fn parse_binding(s: &str) -> Result<CommitmentBinding, String> {
    match s {
        "bettor" => Ok(CommitmentBinding::Bettor),
        "instance" => Ok(CommitmentBinding::Instance),
        other => Err(format!("unknown binding '{}', expected bettor or instance", other)),
    }
}

fn parse_payout(s: &str) -> Result<PayoutMode, String> {
    match s {
        "pull" => Ok(PayoutMode::Pull),
        "push" => Ok(PayoutMode::Push),
        other => Err(format!("unknown payout mode '{}', expected pull or push", other)),
    }
}

async fn run(cli: Cli, data_dir: PathBuf) -> anyhow::Result<()> {
    let now = cli.at.unwrap_or_else(|| SystemClock.now());

    let command = match cli.command {
        Commands::Init {
            owner,
            instance,
            commission,
            max_expiry,
            binding,
            payout,
            no_reveal_window,
            force,
        } => {
            let opts = commands::InitOptions {
                owner,
                instance,
                commission,
                max_expiry,
                binding,
                payout,
                no_reveal_window,
                force,
            };
            return commands::init_escrow(&data_dir, opts).await;
        }
        command => command,
    };

    let mut session = commands::Session::open(&data_dir, cli.at).await?;

    match command {
        // handled above
        Commands::Init { .. } => Ok(()),
        Commands::Commit {
            bettor,
            choice,
            secret,
        } => commands::commit_choice(&session, &bettor, &choice, secret),
        Commands::Place {
            bettor,
            id,
            opponent,
            deposit,
            expiry,
        } => commands::place_wager(&mut session, &bettor, &id, &opponent, deposit, expiry).await,
        Commands::Counter {
            opponent,
            id,
            choice,
            deposit,
        } => commands::counter_wager(&mut session, &opponent, &id, &choice, deposit).await,
        Commands::Verify {
            bettor,
            choice,
            secret,
        } => commands::verify_wager(&mut session, &bettor, &choice, &secret).await,
        Commands::Reclaim(cmd) => commands::reclaim_wager(&mut session, cmd).await,
        Commands::Withdraw { party, sats } => commands::withdraw(&mut session, &party, sats).await,
        Commands::Admin(cmd) => commands::handle_admin_command(cmd, &mut session).await,
        Commands::Show { id } => commands::show_wager(&session, &id, now).await,
        Commands::Balance { party } => commands::show_balance(&session, &party).await,
        Commands::List { all } => commands::list_wagers(&session, now, all).await,
        Commands::Status => commands::show_status(&session, now).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "rochambeau={},rochambeau_escrow={},rochambeau_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(config::default_data_dir);

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir).await?;

    if let Err(e) = run(cli, data_dir).await {
        match e.downcast_ref::<WagerError>() {
            Some(WagerError::InsufficientBalance { need, available }) => {
                eprintln!("Error: Insufficient balance");
                eprintln!("Need: {} sats, Available: {} sats", need, available);
            }
            Some(err) => {
                eprintln!("Error [{}]: {}", err.code(), err);
            }
            None => {
                eprintln!("Error: {}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
