use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use super::PriceSource;

/// Attribution required by the CoinGecko API terms; carried into
/// notification payloads alongside the rate.
pub const ATTRIBUTION: &str = "Price data by CoinGecko";

#[derive(Debug, Deserialize)]
struct SimplePrice {
    bitcoin: UsdPrice,
    monero: UsdPrice,
}

#[derive(Debug, Deserialize)]
struct UsdPrice {
    usd: f64,
}

/// Fetches BTC and XMR prices from the CoinGecko `/simple/price` endpoint
/// and derives the cross rate.
#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CoinGeckoSource {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build coingecko http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait::async_trait]
impl PriceSource for CoinGeckoSource {
    fn label(&self) -> &'static str {
        "coingecko"
    }

    async fn xmr_per_btc(&self) -> Result<f64> {
        let url = format!("{}/simple/price", self.base_url);
        let mut req = self
            .client
            .get(&url)
            .query(&[("ids", "bitcoin,monero"), ("vs_currencies", "usd")]);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-pro-api-key", key);
        }

        let resp = req.send().await.context("request coingecko price")?;
        anyhow::ensure!(
            resp.status().is_success(),
            "coingecko returned {}",
            resp.status()
        );

        let prices: SimplePrice = resp.json().await.context("decode coingecko response")?;
        anyhow::ensure!(
            prices.bitcoin.usd > 0.0 && prices.monero.usd > 0.0,
            "coingecko returned non-positive price"
        );

        Ok(prices.bitcoin.usd / prices.monero.usd)
    }
}
