use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::{CommissionPayer, MicroUsdt};

/// Command-line interface for the escrow arbiter service.
#[derive(Parser)]
#[command(name = "escrow-arbiter", about = "2-of-3 multisig USDT escrow arbiter", version, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config/config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: admin API plus the deposit monitor, deadline monitor
    /// and notification worker.
    Daemon,

    /// Seed a deal in `Created` status from the command line, for operators
    /// bootstrapping a deal outside the normal client-facing entry point.
    CreateDeal {
        #[arg(long, help = "Buyer user id")]
        buyer: String,
        #[arg(long, help = "Seller user id")]
        seller: String,
        #[arg(long, help = "Arbiter user id; defaults to the configured arbiter address")]
        arbiter: Option<String>,
        #[arg(long, help = "Deal amount (e.g. 100 or 100.5)")]
        amount: MicroUsdt,
        #[arg(long, help = "Buyer's registered USDT payout address")]
        buyer_payout_address: String,
        #[arg(long, help = "Seller's registered USDT payout address")]
        seller_payout_address: String,
        #[arg(long, default_value = "buyer", help = "Who pays the commission: buyer, seller, or split")]
        commission_payer: CommissionPayer,
        #[arg(long, default_value_t = 72, help = "Hours from now until the deadline")]
        deadline_hours: i64,
    },
}
