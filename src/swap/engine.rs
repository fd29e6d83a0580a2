use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::absolute::LockTime;

use super::ledger::SwapLedger;
use super::{EventTag, LockObservation, SwapRecord};
use crate::chain::{ChainTip, ChainTransaction};
use crate::error::WatchError;
use crate::htlc::ScriptTemplate;
use crate::rate::{PriceSource, RateConverter};

/// A state change worth announcing.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub swap: SwapRecord,
    pub tag: EventTag,
}

/// Applies newly observed transactions to the ledger: lock candidates
/// create swaps, spends of known lock outputs resolve them, and a periodic
/// sweep expires swaps whose timelock deadline passed unspent.
pub struct LifecycleEngine<S> {
    templates: Vec<ScriptTemplate>,
    ledger: Arc<Mutex<SwapLedger>>,
    rate: Arc<RateConverter<S>>,
    /// Blocks past the timelock before an unspent swap is declared
    /// expired, leaving room for the refund transaction to confirm.
    expiry_grace_blocks: u32,
}

impl<S: PriceSource> LifecycleEngine<S> {
    pub fn new(
        ledger: Arc<Mutex<SwapLedger>>,
        rate: Arc<RateConverter<S>>,
        expiry_grace_blocks: u32,
    ) -> Self {
        Self {
            templates: vec![ScriptTemplate::ComitHtlcV1],
            ledger,
            rate,
            expiry_grace_blocks,
        }
    }

    /// Check one transaction for new locks and for spends of known lock
    /// outputs. Duplicate deliveries are absorbed by the ledger.
    pub async fn process_transaction(
        &self,
        tx: &ChainTransaction,
    ) -> Result<Vec<SwapEvent>, WatchError> {
        let mut events = Vec::new();

        for (vout, output) in tx.outputs.iter().enumerate() {
            let Some(params) = self
                .templates
                .iter()
                .find_map(|t| t.match_output(&output.script_pubkey))
            else {
                continue;
            };

            let conversion = match self.rate.convert(output.value).await {
                Ok(conversion) => Some(conversion),
                Err(WatchError::RateUnavailable) => {
                    tracing::warn!(
                        lock_txid = %tx.txid,
                        "no exchange rate available, recording swap without XMR amount"
                    );
                    None
                }
                Err(err) => return Err(err),
            };

            let obs = LockObservation {
                lock_txid: tx.txid.to_string(),
                lock_vout: vout as u32,
                params,
                btc_amount: output.value,
                conversion,
            };

            let (swap, is_new) = self
                .ledger
                .lock()
                .expect("ledger mutex poisoned")
                .upsert_lock(&obs)?;

            if is_new {
                tracing::info!(
                    lock_txid = %swap.lock_txid,
                    vout,
                    btc_amount = %swap.btc_amount(),
                    timelock = swap.timelock,
                    "detected new HTLC lock"
                );
                events.push(SwapEvent {
                    swap,
                    tag: EventTag::Detected,
                });
            }
        }

        events.extend(self.process_spends(tx)?);

        Ok(events)
    }

    fn process_spends(&self, tx: &ChainTransaction) -> Result<Vec<SwapEvent>, WatchError> {
        let mut events = Vec::new();

        let open: HashMap<(String, u32), SwapRecord> = {
            let ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger
                .open_swaps()?
                .into_iter()
                .map(|swap| ((swap.lock_txid.clone(), swap.lock_vout), swap))
                .collect()
        };
        if open.is_empty() {
            return Ok(events);
        }

        for input in &tx.inputs {
            let key = (input.prev_txid.to_string(), input.prev_vout);
            let Some(swap) = open.get(&key) else {
                continue;
            };

            let Ok(secret_hash) = swap.secret_hash_bytes() else {
                tracing::error!(lock_txid = %swap.lock_txid, "stored secret hash is corrupt");
                continue;
            };

            let Some(kind) = self
                .templates
                .iter()
                .find_map(|t| t.classify_spend(input, &secret_hash))
            else {
                tracing::warn!(
                    lock_txid = %swap.lock_txid,
                    spend_txid = %tx.txid,
                    "spend observed without witness data, leaving swap open"
                );
                continue;
            };

            let result = self
                .ledger
                .lock()
                .expect("ledger mutex poisoned")
                .record_spend(&swap.lock_txid, &tx.txid.to_string(), kind);

            match result {
                Ok((swap, true)) => {
                    tracing::info!(
                        lock_txid = %swap.lock_txid,
                        spend_txid = %tx.txid,
                        kind = kind.as_str(),
                        "HTLC lock spent"
                    );
                    let tag = swap.state.event_tag();
                    events.push(SwapEvent { swap, tag });
                }
                Ok((_, false)) => {}
                Err(WatchError::ConflictingTransition {
                    lock_txid,
                    existing,
                    proposed,
                }) => {
                    tracing::warn!(
                        lock_txid = %lock_txid,
                        existing = %existing,
                        proposed = %proposed,
                        spend_txid = %tx.txid,
                        "conflicting spend classification, keeping recorded outcome"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(events)
    }

    /// Expire swaps whose timelock deadline passed without an observed
    /// spend. Runs off the chain tip, independent of new transactions.
    pub fn sweep_expired(&self, tip: &ChainTip) -> Result<Vec<SwapEvent>, WatchError> {
        let open = {
            let ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.open_swaps()?
        };

        let mut events = Vec::new();
        for swap in open {
            if !self.timelock_passed(swap.timelock, tip) {
                continue;
            }

            let (swap, transitioned) = self
                .ledger
                .lock()
                .expect("ledger mutex poisoned")
                .mark_expired(&swap.lock_txid)?;

            if transitioned {
                tracing::info!(
                    lock_txid = %swap.lock_txid,
                    timelock = swap.timelock,
                    tip_height = tip.height,
                    "swap expired unspent"
                );
                events.push(SwapEvent {
                    swap,
                    tag: EventTag::Expired,
                });
            }
        }

        Ok(events)
    }

    fn timelock_passed(&self, timelock: u32, tip: &ChainTip) -> bool {
        let grace_blocks = self.expiry_grace_blocks;
        match LockTime::from_consensus(timelock) {
            LockTime::Blocks(height) => {
                tip.height >= height.to_consensus_u32().saturating_add(grace_blocks)
            }
            LockTime::Seconds(time) => {
                // ~10 minutes per block of grace
                let grace_secs = u64::from(grace_blocks) * 600;
                tip.median_time >= u64::from(time.to_consensus_u32()).saturating_add(grace_secs)
            }
        }
    }
}
