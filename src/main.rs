//! Cross-chain trader - multi-network token trading core
//!
//! # WARNING
//! - Only `--dry-run` is supported by this binary; it trades against a
//!   simulated market.
//! - Passing the security gate does not make a token safe to hold.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crosschain_trader::cli::commands::{self, CheckProfile, StrategySpec};
use crosschain_trader::config::Config;
use crosschain_trader::types::Network;

/// Cross-chain trader
#[derive(Parser)]
#[command(name = "trader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trader
    Start {
        /// Run against the simulated market (no real trades)
        #[arg(long)]
        dry_run: bool,

        /// Strategy to run, as kind:network:token (repeatable)
        #[arg(long = "strategy", value_name = "KIND:NETWORK:TOKEN")]
        strategies: Vec<StrategySpec>,
    },

    /// Show current configuration (endpoints masked)
    Config,

    /// Screen a token with the security gate using the given facts
    Check {
        network: Network,

        token: String,

        /// Pool liquidity in USD
        #[arg(long, default_value = "1000000")]
        liquidity: f64,

        #[arg(long, default_value = "1000")]
        holders: u64,

        /// Share held by the largest holder, percent
        #[arg(long, default_value = "2")]
        top_holder_pct: f64,

        /// Share held by the ten largest holders, percent
        #[arg(long, default_value = "20")]
        top10_pct: f64,

        /// Contract owner (omit for renounced)
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        unverified: bool,

        /// Liquidity is not locked
        #[arg(long)]
        unlocked: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(
        "crosschain_trader=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded, networks enabled: {:?}",
        config.enabled_networks()
    );

    let result = match cli.command {
        Commands::Start {
            dry_run,
            strategies,
        } => commands::start(&config, dry_run, &strategies).await,
        Commands::Config => commands::show_config(&config),
        Commands::Check {
            network,
            token,
            liquidity,
            holders,
            top_holder_pct,
            top10_pct,
            owner,
            unverified,
            unlocked,
        } => {
            let profile = CheckProfile {
                liquidity,
                holders,
                top_holder_pct,
                top10_pct,
                owner,
                unverified,
                unlocked,
            };
            commands::check(&config, network, &token, profile).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
