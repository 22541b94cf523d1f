//! TRX/USD price feed with a 5-minute cache and a fallback constant for
//! prolonged outages. The payout pipeline must never block on this: a feed
//! error yields the fallback price plus a flag, never a propagated error.

use std::time::{Duration, Instant};

use log::warn;
use tokio::sync::Mutex;
use url::Url;

use super::error::ChainError;

const CACHE_TTL: Duration = Duration::from_secs(300);
const FALLBACK_TRX_USD: f64 = 0.28;

pub struct PriceQuote {
    pub trx_usd: f64,
    pub is_fallback: bool,
}

struct Cached {
    price: f64,
    fetched_at: Instant,
}

pub struct PriceFeed {
    base_url: Url,
    client: reqwest::Client,
    cached: Mutex<Option<Cached>>,
}

impl PriceFeed {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, client: reqwest::Client::new(), cached: Mutex::new(None) }
    }

    /// Returns a price quote, serving the 5-minute cache when fresh and
    /// falling back to [`FALLBACK_TRX_USD`] (flagged) when the feed errors.
    pub async fn get_trx_usd(&self) -> PriceQuote {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return PriceQuote { trx_usd: cached.price, is_fallback: false };
            }
        }

        match self.fetch().await {
            Ok(price) => {
                *guard = Some(Cached { price, fetched_at: Instant::now() });
                PriceQuote { trx_usd: price, is_fallback: false }
            },
            Err(err) => {
                warn!(error:% = err; "price feed unavailable, using fallback");
                PriceQuote { trx_usd: FALLBACK_TRX_USD, is_fallback: true }
            },
        }
    }

    async fn fetch(&self) -> Result<f64, ChainError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            trx_usd: f64,
        }
        let url = self.base_url.join("/price/trx-usd")?;
        let resp: Resp = self.client.get(url).send().await?.json().await?;
        Ok(resp.trx_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_feed_falls_back() {
        let feed = PriceFeed::new(Url::parse("http://127.0.0.1:1").unwrap());
        let quote = feed.get_trx_usd().await;
        assert!(quote.is_fallback);
        assert_eq!(quote.trx_usd, FALLBACK_TRX_USD);
    }
}
