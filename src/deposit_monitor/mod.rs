//! Polls the chain for inbound USDT to every `AwaitingDeposit` multisig
//! address. Re-entrancy-safe (an `AtomicBool` latch skips overlapping ticks)
//! and processed in bounded batches, the same periodic-task shape as the
//! teacher's `tasks/unlocker.rs` (`tokio::select!` over `interval`/shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chain::ChainClient;
use crate::db::{deals, transactions, SqlitePool};
use crate::models::{DealStatus, MicroUsdt, TransactionKind};
use crate::notifier::Notifier;
use crate::state_machine::DealEvent;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const BATCH_SIZE: usize = 5;
const INTER_BATCH_PAUSE: Duration = Duration::from_secs(2);
const DEPOSIT_TOLERANCE_MICRO: i64 = 2_000_000; // -2 USDT, scaled
const MULTISIG_ACTIVATION_TRX_SUN: i64 = 5_000_000;

pub struct DepositMonitor<N: Notifier + Send + Sync + 'static> {
    db_pool: SqlitePool,
    chain: Arc<ChainClient>,
    notifier: Arc<N>,
    arbiter_address: String,
    is_checking: AtomicBool,
    poll_interval: Duration,
}

impl<N: Notifier + Send + Sync + 'static> DepositMonitor<N> {
    pub fn new(db_pool: SqlitePool, chain: Arc<ChainClient>, notifier: Arc<N>, arbiter_address: String) -> Self {
        Self { db_pool, chain, notifier, arbiter_address, is_checking: AtomicBool::new(false), poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("deposit monitor started");
            let mut interval = tokio::time::interval(self.poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!(error:% = e; "deposit monitor cycle failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("deposit monitor received shutdown signal, exiting gracefully");
                        break;
                    }
                }
            }
        })
    }

    /// Runs one poll cycle to completion. Exposed so a test or an ad hoc
    /// admin trigger can drive a single pass without waiting for the interval.
    pub async fn run_cycle(&self) -> Result<(), anyhow::Error> {
        if self.is_checking.swap(true, Ordering::SeqCst) {
            debug!("deposit monitor cycle already in flight, skipping tick");
            return Ok(());
        }
        let result = self.check_all_deals().await;
        self.is_checking.store(false, Ordering::SeqCst);
        result
    }

    async fn check_all_deals(&self) -> Result<(), anyhow::Error> {
        let pool = self.db_pool.clone();
        let deals = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            deals::list_deals_by_status(&conn, DealStatus::AwaitingDeposit)
        })
        .await??;

        for batch in deals.chunks(BATCH_SIZE) {
            for deal in batch {
                if let Err(e) = self.check_deal(deal).await {
                    warn!(deal_id = %deal.id, error:% = e; "deposit check failed for deal");
                }
            }
            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        Ok(())
    }

    async fn check_deal(&self, deal: &crate::models::Deal) -> Result<(), anyhow::Error> {
        let Some(address) = deal.multisig_address.clone() else { return Ok(()) };

        let transfers = self.chain.get_trc20_transfers(&address, 20).await?;
        let required = deal.deposit_required().0 - DEPOSIT_TOLERANCE_MICRO;

        let Some(transfer) = transfers.iter().find(|t| t.to == address && t.amount_micro >= required) else {
            return Ok(());
        };

        let pool = self.db_pool.clone();
        let deal_id = deal.id;
        let tx_hash = transfer.transaction_id.clone();
        let amount = MicroUsdt(transfer.amount_micro);

        let already_credited = {
            let pool = pool.clone();
            let tx_hash = tx_hash.clone();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                transactions::deposit_already_credited(&conn, deal_id, &tx_hash)
            })
            .await??
        };
        if already_credited {
            return Ok(());
        }

        let notifier = self.notifier.clone();
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let mut conn = pool.get()?;
            let current = deals::get_deal(&conn, deal_id)?.ok_or_else(|| anyhow::anyhow!("deal vanished"))?;
            if current.status != DealStatus::AwaitingDeposit {
                return Ok(()); // raced with another writer; skip
            }

            transactions::insert_transaction(&conn, deal_id, TransactionKind::Deposit, Some(&tx_hash), amount, true)?;
            deals::apply_transition(&mut conn, deal_id, current.version, DealEvent::DepositDetected, "deposit_monitor", "deposit detected on-chain")?;

            // Latch before notifying: flips false -> true exactly once, so a
            // crash-and-restart between the flip and delivery skips the
            // notify rather than risk a duplicate.
            if deals::mark_deposit_notified(&conn, deal_id)? {
                if let Err(e) = notifier.send_notification(&conn, Some(deal_id), &current.buyer_id, "deposit_received", "Your deposit has been received and the deal is now locked.") {
                    warn!(deal_id = %deal_id, error:% = e; "failed to notify buyer of deposit");
                }
                if let Err(e) = notifier.send_notification(&conn, Some(deal_id), &current.seller_id, "deposit_received", "The buyer's deposit has been received and the deal is now locked.") {
                    warn!(deal_id = %deal_id, error:% = e; "failed to notify seller of deposit");
                }
            }

            Ok(())
        })
        .await??;

        // Multisig activation: a small TRX transfer so the account is usable on-chain.
        if let Err(e) = self.chain.send_trx(&self.arbiter_address, &address, MULTISIG_ACTIVATION_TRX_SUN).await {
            warn!(deal_id = %deal.id, error:% = e; "multisig activation transfer failed");
        }

        Ok(())
    }
}
