pub mod engine;
pub mod ledger;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::htlc::HtlcParams;
use crate::rate::Conversion;

/// Lifecycle state of a tracked swap. `Locked` is the only non-terminal
/// state; transitions are one-way once persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Locked,
    Redeemed,
    Refunded,
    Expired,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwapState::Locked)
    }

    /// The event tag announcing this state.
    pub fn event_tag(&self) -> EventTag {
        match self {
            SwapState::Locked => EventTag::Detected,
            SwapState::Redeemed => EventTag::Redeemed,
            SwapState::Refunded => EventTag::Refunded,
            SwapState::Expired => EventTag::Expired,
        }
    }
}

/// Notification event tags; each is delivered at most once per swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    Detected,
    Redeemed,
    Refunded,
    Expired,
}

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::Detected => "detected",
            EventTag::Redeemed => "redeemed",
            EventTag::Refunded => "refunded",
            EventTag::Expired => "expired",
        }
    }
}

/// A tracked atomic swap, keyed by its lock transaction id. Terminal
/// records are retained for history, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub lock_txid: String,
    pub lock_vout: u32,
    pub redeem_txid: Option<String>,
    pub refund_txid: Option<String>,
    pub state: SwapState,

    pub btc_amount_sats: u64,
    pub xmr_amount: Option<f64>,
    pub btc_xmr_rate: Option<f64>,
    pub rate_source: Option<String>,

    pub secret_hash: String,
    pub recipient_pubkey_hash: String,
    pub sender_pubkey_hash: String,
    pub timelock: u32,

    pub detected_at: i64,
    pub last_updated_at: i64,
}

impl SwapRecord {
    pub fn btc_amount(&self) -> Amount {
        Amount::from_sat(self.btc_amount_sats)
    }

    pub fn secret_hash_bytes(&self) -> anyhow::Result<[u8; 32]> {
        let bytes = hex::decode(&self.secret_hash)?;
        bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("secret hash is not 32 bytes"))
    }
}

/// A freshly observed HTLC lock output, ready to be recorded.
#[derive(Debug, Clone)]
pub struct LockObservation {
    pub lock_txid: String,
    pub lock_vout: u32,
    pub params: HtlcParams,
    pub btc_amount: Amount,
    /// XMR conversion captured at detection time, absent when no rate
    /// was available.
    pub conversion: Option<Conversion>,
}
