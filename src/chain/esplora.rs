use std::str::FromStr as _;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::{Amount, ScriptBuf, Txid};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ChainInput, ChainOutput, ChainSource, ChainTip, ChainTransaction};

/// Esplora block as defined by the API.
/// https://github.com/Blockstream/esplora/blob/master/API.md
#[derive(Debug, Deserialize)]
struct EsploraBlock {
    id: String,
    tx_count: usize,
    mediantime: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTransaction {
    txid: String,
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    txid: String,
    vout: u32,
    #[serde(default)]
    scriptsig: String,
    #[serde(default)]
    witness: Vec<String>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    #[serde(default)]
    scriptpubkey: String,
    value: u64,
}

impl EsploraTransaction {
    fn into_transaction(self) -> Result<ChainTransaction> {
        let txid = Txid::from_str(&self.txid).with_context(|| format!("parse txid {}", self.txid))?;

        let inputs = self
            .vin
            .into_iter()
            .filter(|vin| !vin.is_coinbase)
            .map(|vin| vin.into_input())
            .collect::<Result<Vec<_>>>()?;

        let outputs = self
            .vout
            .into_iter()
            .map(|vout| vout.into_output())
            .collect::<Result<Vec<_>>>()?;

        Ok(ChainTransaction {
            txid,
            inputs,
            outputs,
        })
    }
}

impl EsploraVin {
    fn into_input(self) -> Result<ChainInput> {
        let prev_txid =
            Txid::from_str(&self.txid).with_context(|| format!("parse prev txid {}", self.txid))?;

        let script_sig =
            ScriptBuf::from_bytes(hex::decode(&self.scriptsig).context("decode scriptsig hex")?);

        let witness = self
            .witness
            .into_iter()
            .map(|item| hex::decode(item).context("decode witness item hex"))
            .collect::<Result<Vec<_>>>()?;

        Ok(ChainInput {
            prev_txid,
            prev_vout: self.vout,
            script_sig,
            witness,
        })
    }
}

impl EsploraVout {
    fn into_output(self) -> Result<ChainOutput> {
        let script_pubkey = ScriptBuf::from_bytes(
            hex::decode(&self.scriptpubkey).context("decode scriptpubkey hex")?,
        );

        Ok(ChainOutput {
            script_pubkey,
            value: Amount::from_sat(self.value),
        })
    }
}

/// HTTP client for an Esplora-compatible REST API (blockstream.info,
/// mempool.space, or a self-hosted instance).
#[derive(Debug, Clone)]
pub struct EsploraClient {
    base_url: String,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build esplora http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        anyhow::ensure!(resp.status().is_success(), "GET {url} returned {}", resp.status());
        resp.text().await.with_context(|| format!("read body of {url}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        anyhow::ensure!(resp.status().is_success(), "GET {url} returned {}", resp.status());
        resp.json().await.with_context(|| format!("decode body of {url}"))
    }

    async fn block_at(&self, height: u32) -> Result<EsploraBlock> {
        let hash = self.get_text(&format!("/block-height/{height}")).await?;
        self.get_json(&format!("/block/{}", hash.trim())).await
    }
}

#[async_trait::async_trait]
impl ChainSource for EsploraClient {
    async fn tip(&self) -> Result<ChainTip> {
        let height: u32 = self
            .get_text("/blocks/tip/height")
            .await?
            .trim()
            .parse()
            .context("parse tip height")?;
        let block = self.block_at(height).await?;

        Ok(ChainTip {
            height,
            median_time: block.mediantime,
        })
    }

    async fn block_txs(&self, height: u32) -> Result<Vec<ChainTransaction>> {
        let block = self.block_at(height).await?;

        let mut txs = Vec::with_capacity(block.tx_count);
        let mut start_index = 0;
        while start_index < block.tx_count {
            let page: Vec<EsploraTransaction> = self
                .get_json(&format!("/block/{}/txs/{start_index}", block.id))
                .await?;
            if page.is_empty() {
                break;
            }
            start_index += page.len();
            for tx in page {
                txs.push(tx.into_transaction()?);
            }
        }

        anyhow::ensure!(
            txs.len() == block.tx_count,
            "block {} returned {} txs, expected {}",
            block.id,
            txs.len(),
            block.tx_count
        );

        Ok(txs)
    }
}
