//! Background daemon mode: runs the admin HTTP API alongside the deposit
//! monitor, deadline monitor and notification worker as one set of
//! cooperating tasks behind a single shutdown broadcast, the same
//! orchestration shape as the teacher's `Daemon` (scanner loop + API server +
//! transaction unlocker) with escrow-relevant tasks in place of the scan loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use tokio::{signal, sync::broadcast};
use url::Url;

use crate::api::{self, AppState};
use crate::chain::{ChainClient, PriceFeed};
use crate::config::EscrowConfig;
use crate::db;
use crate::deadline_monitor::DeadlineMonitor;
use crate::deposit_monitor::DepositMonitor;
use crate::notifier::worker::{NotifierWorker, NotifierWorkerConfig};
use crate::notifier::{NavigationState, QueuedNotifier};
use crate::payout::resource::HttpEnergyRentalProvider;

/// Orchestrates the escrow service's long-running tasks.
pub struct Daemon {
    config: EscrowConfig,
}

impl Daemon {
    pub fn new(config: EscrowConfig) -> Self {
        Self { config }
    }

    /// Runs every task until a shutdown signal is received (Ctrl+C or a
    /// fatal error in any one task), then waits for the rest to wind down.
    pub async fn run(&self) -> Result<()> {
        info!("escrow arbiter daemon starting. Press Ctrl+C to stop.");

        let (shutdown_tx, _) = broadcast::channel(1);

        let db_pool = db::init_db(&self.config.database_path).context("failed to open database")?;

        let chain = Arc::new(
            ChainClient::new(Url::parse(&self.config.tron.rpc_base_url)?, self.config.tron.usdt_contract.clone())
                .context("failed to build chain client")?,
        );
        let price_feed = Arc::new(PriceFeed::new(Url::parse(&self.config.price_feed.base_url)?));
        let rental = if self.config.energy_rental.enabled {
            Some(Arc::new(HttpEnergyRentalProvider::new(Url::parse(&self.config.energy_rental.base_url)?)))
        } else {
            None
        };

        let target_base_url = self.config.notifier.target_base_url.clone();
        let notifier = Arc::new(QueuedNotifier {
            target_url_for_user: Arc::new(move |user_id: &str| format!("{target_base_url}/users/{user_id}")),
            nav: Arc::new(NavigationState::new()),
        });

        let deposit_monitor = Arc::new(
            DepositMonitor::new(db_pool.clone(), chain.clone(), notifier.clone(), self.config.arbiter.address.clone())
                .with_poll_interval(Duration::from_millis(self.config.monitor.deposit_check_interval_ms)),
        );
        let deadline_monitor = Arc::new(
            DeadlineMonitor::new(db_pool.clone(), notifier.clone())
                .with_poll_interval(Duration::from_secs(self.config.monitor.deadline_poll_interval_secs)),
        );
        let notifier_worker = Arc::new(NotifierWorker::new(
            db_pool.clone(),
            NotifierWorkerConfig {
                enabled: self.config.notifier.enabled,
                signing_secret: (!self.config.notifier.signing_secret.is_empty()).then(|| self.config.notifier.signing_secret.clone()),
            },
        ));

        let deposit_handle = deposit_monitor.run(shutdown_tx.subscribe());
        let deadline_handle = deadline_monitor.run(shutdown_tx.subscribe());
        let notifier_handle = tokio::spawn(NotifierWorker::run(notifier_worker, shutdown_tx.subscribe()));

        let app_state = AppState {
            db_pool: db_pool.clone(),
            chain,
            price_feed,
            rental,
            arbiter_address: self.config.arbiter.address.clone(),
            commission_wallet: self.config.wallet.commission_wallet.clone(),
            admin_token: self.config.admin_api.token.clone(),
        };
        let router = api::create_router(app_state);
        let addr = format!("0.0.0.0:{}", self.config.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow!("failed to bind API server to {addr}: {e}"))?;
        info!(address = &*addr; "admin API listening");

        let mut shutdown_rx_api = shutdown_tx.subscribe();
        let api_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx_api.recv().await.ok();
                })
                .await
        });

        let shutdown_tx_ctrlc = shutdown_tx.clone();
        let ctrlc_handle = tokio::spawn(async move {
            signal::ctrl_c().await.expect("failed to listen for ctrl_c");
            info!("received shutdown signal, stopping all tasks...");
            let _ = shutdown_tx_ctrlc.send(());
        });

        let (api_res, _deposit_res, _deadline_res, _notifier_res, _ctrlc_res) =
            tokio::try_join!(api_handle, deposit_handle, deadline_handle, notifier_handle, ctrlc_handle)
                .map_err(|e| anyhow!("a daemon task panicked: {e}"))?;
        if let Err(e) = api_res {
            error!(error:% = e; "API server exited with an error");
        }

        info!("escrow arbiter daemon stopped gracefully.");
        Ok(())
    }
}
