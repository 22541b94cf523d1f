//! Background task draining the notification queue. Same interval +
//! exponential-backoff-with-jitter shape as the teacher's `WebhookWorker`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::broadcast;

use crate::db::notifications::{self, NoticeStatus, QueuedNotice};
use crate::db::SqlitePool;
use crate::notifier::sender::{DeliveryResult, NotifierSender};

const POLL_INTERVAL: u64 = 10;
const BATCH_SIZE: i64 = 20;
const MAX_ATTEMPTS: i32 = 10;

#[derive(Clone)]
pub struct NotifierWorkerConfig {
    pub enabled: bool,
    pub signing_secret: Option<String>,
}

pub struct NotifierWorker {
    db_pool: SqlitePool,
    config: NotifierWorkerConfig,
    sender: NotifierSender,
}

impl NotifierWorker {
    pub fn new(db_pool: SqlitePool, config: NotifierWorkerConfig) -> Self {
        Self { db_pool, config, sender: NotifierSender::new() }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled || self.config.signing_secret.is_none() {
            info!("notifier worker disabled or missing signing secret, exiting task");
            return;
        }

        info!("notifier worker started");
        let mut interval = tokio::time::interval(Duration::from_secs(POLL_INTERVAL));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_batch().await {
                        error!(error:% = e; "error processing notification batch");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("notifier worker received shutdown signal");
                    break;
                }
            }
        }
    }

    async fn process_batch(&self) -> Result<(), anyhow::Error> {
        let pool = self.db_pool.clone();
        let items = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            notifications::fetch_due(&conn, BATCH_SIZE)
        })
        .await??;

        if items.is_empty() {
            return Ok(());
        }

        debug!(count = items.len(); "processing due notifications");
        let secret = self.config.signing_secret.as_ref().expect("checked in run()");
        for item in items {
            self.process_item(item, secret).await;
        }
        Ok(())
    }

    async fn process_item(&self, item: QueuedNotice, secret: &str) {
        let result = self.sender.send(&item.target_url, secret, &item.payload).await;

        let (new_status, next_retry, error_msg) = match result {
            DeliveryResult::Success => {
                info!(id = item.id; "notification delivered");
                (NoticeStatus::Sent, item.next_retry_at, None)
            },
            DeliveryResult::PermanentFailure(msg) => {
                warn!(id = item.id, error = %msg; "notification failed permanently");
                (NoticeStatus::PermanentFailure, item.next_retry_at, Some(msg))
            },
            DeliveryResult::RetryableFailure(msg) => {
                let (next_retry, stop) = calculate_backoff(item.attempt_count + 1);
                if stop {
                    warn!(id = item.id, error = %msg; "notification max retries exceeded");
                    (NoticeStatus::PermanentFailure, next_retry, Some(msg))
                } else {
                    warn!(id = item.id, attempt = item.attempt_count + 1, error = %msg; "notification retrying");
                    (NoticeStatus::Failed, next_retry, Some(msg))
                }
            },
        };

        let pool = self.db_pool.clone();
        let attempt_count = item.attempt_count + 1;
        let update_result = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            notifications::update_status(&conn, item.id, new_status, attempt_count, next_retry, error_msg.as_deref())
        })
        .await;

        if let Err(e) = update_result {
            error!(id = item.id, error:? = e; "failed to update notification status");
        }
    }
}

fn calculate_backoff(attempt: i32) -> (NaiveDateTime, bool) {
    if attempt >= MAX_ATTEMPTS {
        return (Utc::now().naive_utc(), true);
    }
    let base_seconds = 15 * 4u64.pow((attempt - 1) as u32);
    let capped_seconds = base_seconds.min(3600);
    let jitter_range = capped_seconds / 10;
    let jitter = rand::thread_rng().gen_range(0..=jitter_range.max(1));
    let final_seconds = if rand::thread_rng().gen_bool(0.5) { capped_seconds + jitter } else { capped_seconds.saturating_sub(jitter) };
    (Utc::now().naive_utc() + chrono::Duration::seconds(final_seconds as i64), false)
}
