//! Default, serde-shaped configuration for the service. Mirrors the
//! teacher's `WalletConfig`: one struct per concern, all living under a
//! single root, `Default` providing every value a fresh `config/config.toml`
//! ships with.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TronConfig {
    pub rpc_base_url: String,
    pub api_key: String,
    pub usdt_contract: String,
}

impl Default for TronConfig {
    fn default() -> Self {
        Self {
            rpc_base_url: "https://api.trongrid.io".to_string(),
            api_key: String::new(),
            usdt_contract: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArbiterConfig {
    pub address: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WalletConfig {
    pub commission_wallet: String,
    pub service_wallet_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub deposit_check_interval_ms: u64,
    pub deadline_poll_interval_secs: u64,
    pub multisig_activation_trx: i64,
    pub fallback_trx_amount: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { deposit_check_interval_ms: 30_000, deadline_poll_interval_secs: 300, multisig_activation_trx: 5, fallback_trx_amount: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnergyRentalConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for EnergyRentalConfig {
    fn default() -> Self {
        Self { enabled: false, base_url: "http://127.0.0.1:4100".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceFeedConfig {
    pub base_url: String,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:4100".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub target_base_url: String,
    pub signing_secret: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { enabled: false, target_base_url: "http://127.0.0.1:4200".to_string(), signing_secret: String::new() }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdminApiConfig {
    pub token: String,
}

/// Root configuration, deserialized from `config/config.toml` plus any
/// `ESCROW__<SECTION>__<KEY>` environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EscrowConfig {
    pub database_path: PathBuf,
    pub api_port: u16,
    pub tron: TronConfig,
    pub arbiter: ArbiterConfig,
    pub wallet: WalletConfig,
    pub monitor: MonitorConfig,
    pub energy_rental: EnergyRentalConfig,
    pub price_feed: PriceFeedConfig,
    pub notifier: NotifierConfig,
    pub admin_api: AdminApiConfig,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/escrow.db"),
            api_port: 8080,
            tron: TronConfig::default(),
            arbiter: ArbiterConfig::default(),
            wallet: WalletConfig::default(),
            monitor: MonitorConfig::default(),
            energy_rental: EnergyRentalConfig::default(),
            price_feed: PriceFeedConfig::default(),
            notifier: NotifierConfig::default(),
            admin_api: AdminApiConfig::default(),
        }
    }
}
