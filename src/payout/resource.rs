//! Resource provisioning for a multisig payout: energy rental (preferred)
//! with a TRX-transfer fallback. Both are thin `reqwest`/chain clients behind
//! a trait so tests substitute a `wiremock` server or a stub.

use log::warn;

use crate::chain::{ChainClient, ChainError};
use crate::models::MicroUsdt;

pub const FALLBACK_TRX_AMOUNT_SUN: i64 = 30_000_000; // 30 TRX, expressed in sun

#[derive(Debug, Clone)]
pub struct RentalOutcome {
    pub success: bool,
    pub cost_trx_sun: i64,
    pub error: Option<String>,
}

/// Native `async fn` in a trait (stable since 1.75): kept generic rather than
/// `dyn`-dispatched since the only two call sites (pipeline, tests) both know
/// the concrete type at compile time.
pub trait EnergyRentalProvider: Send + Sync {
    fn rent_energy_for_deal(&self, multisig_address: &str) -> impl std::future::Future<Output = RentalOutcome> + Send;
}

pub struct HttpEnergyRentalProvider {
    base_url: url::Url,
    client: reqwest::Client,
}

impl HttpEnergyRentalProvider {
    pub fn new(base_url: url::Url) -> Self {
        Self { base_url, client: reqwest::Client::new() }
    }
}

impl EnergyRentalProvider for HttpEnergyRentalProvider {
    async fn rent_energy_for_deal(&self, multisig_address: &str) -> RentalOutcome {
        #[derive(serde::Deserialize)]
        struct Resp {
            success: bool,
            cost_trx_sun: i64,
        }

        let url = match self.base_url.join("/rent") {
            Ok(u) => u,
            Err(e) => return RentalOutcome { success: false, cost_trx_sun: 0, error: Some(e.to_string()) },
        };

        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "address": multisig_address }))
            .send()
            .await;

        match resp {
            Ok(r) => match r.json::<Resp>().await {
                Ok(body) => RentalOutcome { success: body.success, cost_trx_sun: body.cost_trx_sun, error: None },
                Err(e) => RentalOutcome { success: false, cost_trx_sun: 0, error: Some(e.to_string()) },
            },
            Err(e) => RentalOutcome { success: false, cost_trx_sun: 0, error: Some(e.to_string()) },
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResourceMethod {
    EnergyRental { cost_trx_sun: i64 },
    TrxFallback { sent_sun: i64 },
}

/// Provisions energy for the multisig, preferring rental and falling back to
/// a direct TRX transfer from the arbiter when rental is disabled or fails.
pub async fn provision<R: EnergyRentalProvider>(
    rental: Option<&R>,
    chain: &ChainClient,
    arbiter_address: &str,
    multisig_address: &str,
) -> Result<ResourceMethod, ChainError> {
    if let Some(provider) = rental {
        let outcome = provider.rent_energy_for_deal(multisig_address).await;
        if outcome.success {
            return Ok(ResourceMethod::EnergyRental { cost_trx_sun: outcome.cost_trx_sun });
        }
        warn!(error:? = outcome.error; "energy rental failed, falling back to TRX transfer");
    }

    chain.send_trx(arbiter_address, multisig_address, FALLBACK_TRX_AMOUNT_SUN).await?;
    Ok(ResourceMethod::TrxFallback { sent_sun: FALLBACK_TRX_AMOUNT_SUN })
}

pub fn micro_usdt_at_price(trx_sun: i64, trx_usd: f64) -> MicroUsdt {
    let trx = trx_sun as f64 / 1_000_000.0;
    MicroUsdt((trx * trx_usd * 1_000_000.0).round() as i64)
}
