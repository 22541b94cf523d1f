//! Escrow Arbiter CLI
//!
//! Entry point for the 2-of-3 multisig USDT escrow coordination service:
//! runs the long-lived daemon (admin API, deposit monitor, deadline monitor,
//! notification worker) or a handful of one-shot operator utilities.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use escrow_arbiter::cli::{Cli, Commands};
use escrow_arbiter::config;
use escrow_arbiter::daemon::Daemon;
use escrow_arbiter::db::{self, deals};
use escrow_arbiter::key_validation;
use escrow_arbiter::log::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let settings = config::load_configuration(&cli.config).context("failed to load configuration")?;

    match cli.command {
        Commands::Daemon => {
            let daemon = Daemon::new(settings);
            daemon.run().await
        },
        Commands::CreateDeal {
            buyer,
            seller,
            arbiter,
            amount,
            buyer_payout_address,
            seller_payout_address,
            commission_payer,
            deadline_hours,
        } => {
            let pool = db::init_db(&settings.database_path).context("failed to open database")?;
            let mut conn = pool.get().context("failed to acquire database connection")?;
            let arbiter_id = arbiter.unwrap_or_else(|| settings.arbiter.address.clone());
            let deadline = Utc::now().naive_utc() + chrono::Duration::hours(deadline_hours);

            let deal = deals::create_deal(
                &conn,
                &buyer,
                &seller,
                &arbiter_id,
                amount,
                &buyer_payout_address,
                &seller_payout_address,
                commission_payer,
                deadline,
            )
            .context("failed to create deal")?;

            // The two plaintext ephemeral keys are revealed exactly once and never
            // persisted; this is that reveal until a chat-facing entry point exists.
            let (buyer_private_key, buyer_key_addr) = key_validation::generate_keypair();
            let (seller_private_key, seller_key_addr) = key_validation::generate_keypair();
            let (_wallet_private_key, wallet_address) = key_validation::generate_keypair();

            let deal = deals::provision_wallet(
                &mut conn,
                deal.id,
                deal.version,
                &wallet_address,
                &buyer_key_addr,
                &seller_key_addr,
                &settings.arbiter.address,
            )
            .context("failed to provision multisig wallet")?;

            eprintln!("buyer ephemeral private key (reveal once, do not log): {buyer_private_key}");
            eprintln!("seller ephemeral private key (reveal once, do not log): {seller_private_key}");
            println!("{}", serde_json::to_string_pretty(&deal)?);
            Ok(())
        },
    }
}
