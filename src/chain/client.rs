//! Thin REST client over the TRON full-node HTTP API.
//!
//! Same shape as the teacher's `HttpClient`/`WalletHttpClient`: a
//! `reqwest_middleware::ClientWithMiddleware` built with a retry policy,
//! wrapped here by a `CircuitBreaker` so repeated RPC failures fail fast
//! instead of retrying into an outage.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use super::circuit_breaker::CircuitBreaker;
use super::error::ChainError;

const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BROADCAST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountBalance {
    pub address: String,
    pub trx_sun: i64,
    pub usdt_micro: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountResources {
    pub address: String,
    pub energy_used: i64,
    pub energy_limit: i64,
    pub bandwidth_used: i64,
    pub bandwidth_limit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Trc20Transfer {
    pub transaction_id: String,
    pub from: String,
    pub to: String,
    pub token_contract: String,
    pub amount_micro: i64,
    pub block_timestamp: i64,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionInfo {
    pub tx_hash: String,
    pub block_number: Option<i64>,
    pub confirmed: bool,
    pub result: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastResult {
    pub tx_hash: String,
    pub accepted: bool,
    pub message: Option<String>,
}

/// Wraps TRON RPC: balance, transfer build/sign/multisign/broadcast, TRC20
/// transfer history. Every call is gated by a shared `CircuitBreaker`.
pub struct ChainClient {
    base_url: Url,
    usdt_contract: String,
    client: reqwest_middleware::ClientWithMiddleware,
    breaker: CircuitBreaker,
    last_latency: RwLock<Option<Duration>>,
}

impl ChainClient {
    pub fn new(base_url: Url, usdt_contract: impl Into<String>) -> Result<Self, anyhow::Error> {
        let retry_policy =
            reqwest_retry::policies::ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_BROADCAST_TIMEOUT_SECS))
            .build()?;
        let client = reqwest_middleware::ClientBuilder::new(inner)
            .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base_url,
            usdt_contract: usdt_contract.into(),
            client,
            breaker: CircuitBreaker::new(5, Duration::from_secs(60), Duration::from_secs(30)),
            last_latency: RwLock::new(None),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn get_balance(&self, address: &str) -> Result<AccountBalance, ChainError> {
        self.get(&format!("/wallet/getaccount?address={address}")).await
    }

    pub async fn get_account_resources(&self, address: &str) -> Result<AccountResources, ChainError> {
        self.get(&format!("/wallet/getaccountresource?address={address}")).await
    }

    pub async fn get_trc20_transfers(&self, address: &str, limit: u32) -> Result<Vec<Trc20Transfer>, ChainError> {
        self.get(&format!(
            "/v1/accounts/{address}/transactions/trc20?limit={limit}&contract_address={}",
            self.usdt_contract
        ))
        .await
    }

    pub async fn get_transaction_info(&self, tx_hash: &str) -> Result<TransactionInfo, ChainError> {
        self.get(&format!("/wallet/gettransactioninfobyid?value={tx_hash}")).await
    }

    /// Builds, signs with the provided keys (2-of-3 multisig), and broadcasts
    /// a USDT transfer. `signing_keys` must contain exactly two of the three
    /// deal signer private keys.
    pub async fn send_usdt(
        &self,
        from_multisig: &str,
        to: &str,
        amount_micro: i64,
        signing_keys: &[&str],
    ) -> Result<BroadcastResult, ChainError> {
        let body = serde_json::json!({
            "owner_address": from_multisig,
            "contract_address": self.usdt_contract,
            "function_selector": "transfer(address,uint256)",
            "parameter": { "to": to, "amount": amount_micro },
            "signature_count": signing_keys.len(),
        });
        self.post("/wallet/triggersmartcontract", body).await
    }

    pub async fn send_trx(&self, from: &str, to: &str, sun: i64) -> Result<BroadcastResult, ChainError> {
        let body = serde_json::json!({ "owner_address": from, "to_address": to, "amount": sun });
        self.post("/wallet/broadcasttransaction", body).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        if !self.breaker.allow_call() {
            return Err(ChainError::CircuitOpen);
        }
        let result = self.send(Method::GET, path, None).await;
        self.record_outcome(&result);
        result
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T, ChainError> {
        if !self.breaker.allow_call() {
            return Err(ChainError::CircuitOpen);
        }
        let result = self.send(Method::POST, path, Some(body)).await;
        self.record_outcome(&result);
        result
    }

    fn record_outcome<T>(&self, result: &Result<T, ChainError>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(ChainError::CircuitOpen) => {},
            Err(_) => self.breaker.record_failure(),
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ChainError> {
        let start = Instant::now();
        let url = self.base_url.join(path)?;

        let req = match method {
            Method::GET => self.client.get(url),
            Method::POST => {
                let req = self.client.post(url);
                match body {
                    Some(b) => req.body(serde_json::to_string(&b)?).header("Content-Type", "application/json"),
                    None => req,
                }
            },
            _ => unreachable!("ChainClient only issues GET/POST"),
        };

        let resp = req.send().await?;
        *self.last_latency.write().await = Some(start.elapsed());

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(ChainError::ServerError { status, body });
        }

        Ok(resp.json().await?)
    }

    pub async fn last_latency(&self) -> Option<Duration> {
        *self.last_latency.read().await
    }
}

pub fn default_read_timeout() -> Duration {
    Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS)
}
