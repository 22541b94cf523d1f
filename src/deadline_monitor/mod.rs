//! Sweeps `Funded` deals past their deadline. Two independent effects per
//! deal, gated by separate latches so a restart mid-sweep never repeats one:
//! a one-shot expiration notice, and — after a 12 h grace period — opening a
//! `key_validation` Session for whichever party the grace window favors.
//!
//! Same re-entrancy-safe, bounded-batch shape as `deposit_monitor`, grounded
//! on the teacher's `tasks/unlocker.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::db::{deals, sessions, SqlitePool};
use crate::models::{Deal, PendingKeyValidation};
use crate::notifier::Notifier;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const BATCH_SIZE: usize = 5;
const INTER_BATCH_PAUSE: Duration = Duration::from_secs(2);
const GRACE_HOURS: i64 = 12;
const KEY_VALIDATION_TTL_HOURS: i64 = 24;

pub struct DeadlineMonitor<N: Notifier + Send + Sync + 'static> {
    db_pool: SqlitePool,
    notifier: Arc<N>,
    is_checking: AtomicBool,
    poll_interval: Duration,
}

impl<N: Notifier + Send + Sync + 'static> DeadlineMonitor<N> {
    pub fn new(db_pool: SqlitePool, notifier: Arc<N>) -> Self {
        Self { db_pool, notifier, is_checking: AtomicBool::new(false), poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("deadline monitor started");
            let mut interval = tokio::time::interval(self.poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!(error:% = e; "deadline monitor cycle failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("deadline monitor received shutdown signal, exiting gracefully");
                        break;
                    }
                }
            }
        })
    }

    /// Runs one sweep to completion. Exposed so a test or an ad hoc admin
    /// trigger can drive a single pass without waiting for the interval.
    pub async fn run_cycle(&self) -> Result<(), anyhow::Error> {
        if self.is_checking.swap(true, Ordering::SeqCst) {
            debug!("deadline monitor cycle already in flight, skipping tick");
            return Ok(());
        }
        let result = self.check_all_deals().await;
        self.is_checking.store(false, Ordering::SeqCst);
        result
    }

    async fn check_all_deals(&self) -> Result<(), anyhow::Error> {
        let pool = self.db_pool.clone();
        let now = Utc::now().naive_utc();
        let deals = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            deals::list_funded_past_deadline(&conn, now)
        })
        .await??;

        for batch in deals.chunks(BATCH_SIZE) {
            for deal in batch {
                if let Err(e) = self.check_deal(deal).await {
                    warn!(deal_id = %deal.id, error:% = e; "deadline check failed for deal");
                }
            }
            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        // Sessions the winner never redeemed eventually expire; sweep them so
        // a stale key_validation row can't be mistaken for a live one.
        let pool = self.db_pool.clone();
        let swept = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            sessions::sweep_expired(&conn)
        })
        .await??;
        if swept > 0 {
            debug!(count = swept; "swept expired sessions");
        }

        Ok(())
    }

    async fn check_deal(&self, deal: &Deal) -> Result<(), anyhow::Error> {
        let pool = self.db_pool.clone();
        let deal_id = deal.id;
        let notifier = self.notifier.clone();

        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let conn = pool.get()?;
            let current = deals::get_deal(&conn, deal_id)?.ok_or_else(|| anyhow::anyhow!("deal vanished"))?;

            if deals::mark_deadline_notified(&conn, deal_id)? {
                let notice = "The deadline for this deal has passed. Confirm the work, open a dispute, or (seller) submit your work.";
                if let Err(e) = notifier.send_notification(&conn, Some(deal_id), &current.buyer_id, "deadline_expired", notice) {
                    warn!(deal_id = %deal_id, error:% = e; "failed to notify buyer of deadline expiry");
                }
                if let Err(e) = notifier.send_notification(&conn, Some(deal_id), &current.seller_id, "deadline_expired", notice) {
                    warn!(deal_id = %deal_id, error:% = e; "failed to notify seller of deadline expiry");
                }
            }

            let grace_elapsed = Utc::now().naive_utc() - current.deadline >= chrono::Duration::hours(GRACE_HOURS);
            if grace_elapsed && current.pending_key_validation.is_none() {
                let (party, tag, prompt) = if current.work_submitted {
                    (current.seller_id.clone(), PendingKeyValidation::SellerRelease, "The buyer didn't respond in time. Enter your private key to claim the payout.")
                } else {
                    (current.buyer_id.clone(), PendingKeyValidation::BuyerRefund, "The seller never submitted work in time. Enter your private key to claim a refund.")
                };

                if deals::set_pending_key_validation(&conn, deal_id, tag)? {
                    sessions::create_session(&conn, deal_id, &party, "key_validation", chrono::Duration::hours(KEY_VALIDATION_TTL_HOURS))?;
                    if let Err(e) = notifier.send_notification(&conn, Some(deal_id), &party, "key_validation_prompt", prompt) {
                        warn!(deal_id = %deal_id, error:% = e; "failed to prompt for key validation");
                    }
                }
            }

            Ok(())
        })
        .await?
    }
}
