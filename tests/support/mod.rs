// not every integration test uses every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::{Amount, ScriptBuf, Txid};
use comit_swap_watch::chain::{
    ChainInput, ChainOutput, ChainSource, ChainTip, ChainTransaction,
};
use comit_swap_watch::htlc::HtlcParams;
use comit_swap_watch::notify::{Notifier, SwapAlert};
use comit_swap_watch::rate::PriceSource;

pub const PREIMAGE: [u8; 32] = [0x5a; 32];

pub fn sample_params(timelock: u32) -> HtlcParams {
    HtlcParams {
        secret_hash: sha256::Hash::hash(&PREIMAGE).to_byte_array(),
        recipient_pubkey_hash: [0x11; 20],
        sender_pubkey_hash: [0x22; 20],
        timelock,
    }
}

pub fn txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

/// A transaction whose first output locks `amount` under the HTLC.
pub fn lock_tx(seed: u8, params: &HtlcParams, amount: Amount) -> ChainTransaction {
    ChainTransaction {
        txid: txid(seed),
        inputs: vec![],
        outputs: vec![
            ChainOutput {
                script_pubkey: params.locking_script(),
                value: amount,
            },
            ChainOutput {
                // change output, must not match
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x33, 0x33]),
                value: Amount::from_sat(1_000),
            },
        ],
    }
}

/// A transaction spending `lock` vout 0 through the preimage branch.
pub fn redeem_tx(seed: u8, lock: &ChainTransaction, params: &HtlcParams) -> ChainTransaction {
    spend_tx(
        seed,
        lock,
        vec![
            vec![0x30; 71],
            vec![0x02; 33],
            PREIMAGE.to_vec(),
            vec![0x01],
            params.locking_script().into_bytes(),
        ],
    )
}

/// A transaction spending `lock` vout 0 through the timelock branch.
pub fn refund_tx(seed: u8, lock: &ChainTransaction, params: &HtlcParams) -> ChainTransaction {
    spend_tx(
        seed,
        lock,
        vec![
            vec![0x30; 71],
            vec![0x02; 33],
            vec![],
            params.locking_script().into_bytes(),
        ],
    )
}

/// A spend the provider returned without witness data.
pub fn opaque_spend_tx(seed: u8, lock: &ChainTransaction) -> ChainTransaction {
    spend_tx(seed, lock, vec![])
}

fn spend_tx(seed: u8, lock: &ChainTransaction, witness: Vec<Vec<u8>>) -> ChainTransaction {
    ChainTransaction {
        txid: txid(seed),
        inputs: vec![ChainInput {
            prev_txid: lock.txid,
            prev_vout: 0,
            script_sig: ScriptBuf::new(),
            witness,
        }],
        outputs: vec![ChainOutput {
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0x44, 0x44]),
            value: Amount::from_sat(14_999_000),
        }],
    }
}

pub fn tip(height: u32) -> ChainTip {
    ChainTip {
        height,
        median_time: 1_700_000_000,
    }
}

/// Price source whose rate the test controls; `None` simulates an outage.
#[derive(Default)]
pub struct StubPriceSource {
    rate: Mutex<Option<f64>>,
}

impl StubPriceSource {
    pub fn with_rate(rate: f64) -> std::sync::Arc<Self> {
        let source = Self::default();
        *source.rate.lock().unwrap() = Some(rate);
        std::sync::Arc::new(source)
    }

    pub fn unavailable() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn set_rate(&self, rate: f64) {
        *self.rate.lock().unwrap() = Some(rate);
    }
}

#[async_trait::async_trait]
impl PriceSource for StubPriceSource {
    fn label(&self) -> &'static str {
        "stub"
    }

    async fn xmr_per_btc(&self) -> Result<f64> {
        self.rate
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("price source down"))
    }
}

/// Chain source serving scripted blocks keyed by height.
#[derive(Default)]
pub struct StubChainSource {
    tip: Mutex<Option<ChainTip>>,
    blocks: Mutex<HashMap<u32, Vec<ChainTransaction>>>,
}

impl StubChainSource {
    pub fn set_tip(&self, tip: ChainTip) {
        *self.tip.lock().unwrap() = Some(tip);
    }

    pub fn set_block(&self, height: u32, txs: Vec<ChainTransaction>) {
        self.blocks.lock().unwrap().insert(height, txs);
    }
}

#[async_trait::async_trait]
impl ChainSource for StubChainSource {
    async fn tip(&self) -> Result<ChainTip> {
        self.tip
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("chain source down"))
    }

    async fn block_txs(&self, height: u32) -> Result<Vec<ChainTransaction>> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every alert; can be switched into a failing mode.
#[derive(Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<SwapAlert>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<SwapAlert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn sent_tags(&self) -> Vec<(String, String)> {
        self.alerts()
            .into_iter()
            .map(|alert| (alert.lock_txid, alert.event.as_str().to_string()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, alert: &SwapAlert) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("notifier down")
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
