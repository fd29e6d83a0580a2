pub mod esplora;

use bitcoin::{Amount, ScriptBuf, Txid};

/// Current best block as reported by the chain-data provider.
#[derive(Debug, Clone, Copy)]
pub struct ChainTip {
    pub height: u32,
    /// Median time past of the tip block, used for time-based locktimes.
    pub median_time: u64,
}

#[derive(Debug, Clone)]
pub struct ChainInput {
    pub prev_txid: Txid,
    pub prev_vout: u32,
    pub script_sig: ScriptBuf,
    /// Witness stack items, empty when the provider omitted witness data.
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub script_pubkey: ScriptBuf,
    pub value: Amount,
}

#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub txid: Txid,
    pub inputs: Vec<ChainInput>,
    pub outputs: Vec<ChainOutput>,
}

/// Chain-data collaborator. May return duplicates across polling windows or
/// be temporarily unavailable; callers retry with backoff.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    async fn tip(&self) -> anyhow::Result<ChainTip>;

    async fn block_txs(&self, height: u32) -> anyhow::Result<Vec<ChainTransaction>>;
}

#[async_trait::async_trait]
impl<T: ChainSource + ?Sized> ChainSource for std::sync::Arc<T> {
    async fn tip(&self) -> anyhow::Result<ChainTip> {
        (**self).tip().await
    }

    async fn block_txs(&self, height: u32) -> anyhow::Result<Vec<ChainTransaction>> {
        (**self).block_txs(height).await
    }
}
