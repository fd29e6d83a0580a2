//! Watches the Bitcoin chain for COMIT-style BTC⇆XMR atomic swap HTLCs,
//! tracks each swap from lock to redeem/refund/expiry, and emits one
//! notification per lifecycle event.

pub mod chain;
pub mod error;
pub mod health;
pub mod htlc;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod rate;
pub mod swap;
