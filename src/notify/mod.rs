pub mod webhook;

use anyhow::Result;
use bitcoin::Amount;
use chrono::DateTime;

use crate::rate::coingecko;
use crate::swap::engine::SwapEvent;
use crate::swap::EventTag;

/// Structured notification payload for a lifecycle event.
#[derive(Debug, Clone)]
pub struct SwapAlert {
    pub lock_txid: String,
    pub event: EventTag,
    pub btc_amount: Amount,
    pub xmr_amount: Option<f64>,
    pub btc_xmr_rate: Option<f64>,
    pub rate_source: Option<String>,
    pub timestamp: i64,
}

impl SwapAlert {
    pub fn from_event(event: &SwapEvent) -> Self {
        Self {
            lock_txid: event.swap.lock_txid.clone(),
            event: event.tag,
            btc_amount: event.swap.btc_amount(),
            xmr_amount: event.swap.xmr_amount,
            btc_xmr_rate: event.swap.btc_xmr_rate,
            rate_source: event.swap.rate_source.clone(),
            timestamp: event.swap.last_updated_at,
        }
    }

    pub fn btc_amount_display(&self) -> String {
        format!("{:.8}", self.btc_amount.to_btc())
    }

    pub fn timestamp_display(&self) -> String {
        DateTime::from_timestamp(self.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

/// Human-readable message for an alert.
pub fn format_alert(alert: &SwapAlert) -> String {
    let headline = match alert.event {
        EventTag::Detected => "🔄 New BTC⇆XMR atomic swap detected!",
        EventTag::Redeemed => "✅ Atomic swap redeemed",
        EventTag::Refunded => "↩️ Atomic swap refunded",
        EventTag::Expired => "⌛ Atomic swap expired unspent",
    };

    let mut lines = vec![
        headline.to_string(),
        String::new(),
        format!("📦 TX: {}", short_txid(&alert.lock_txid)),
        format!("💰 Amount: {} BTC", alert.btc_amount_display()),
    ];

    if let (Some(xmr), Some(rate)) = (alert.xmr_amount, alert.btc_xmr_rate) {
        lines.push(format!("   ≈ {xmr:.4} XMR"));
        lines.push(format!("📊 Rate: 1 BTC = {rate:.4} XMR"));
        if alert.rate_source.as_deref() == Some("coingecko") {
            lines.push(format!("💱 {}", coingecko::ATTRIBUTION));
        }
    }

    lines.push(format!("🕐 {}", alert.timestamp_display()));
    lines.push(String::new());
    lines.push("#AtomicSwap #Bitcoin #Monero".to_string());

    lines.join("\n")
}

fn short_txid(txid: &str) -> String {
    if txid.len() > 16 {
        format!("{}...", &txid[..16])
    } else {
        txid.to_string()
    }
}

/// Notification transport. Implementations must tolerate redelivery of the
/// same event tag; the ledger withholds its dedupe mark until a dispatch
/// is acknowledged.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, alert: &SwapAlert) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn notify(&self, alert: &SwapAlert) -> Result<()> {
        (**self).notify(alert).await
    }
}

/// Prints alerts to stdout. Always configured, mirrors what the webhook
/// transports deliver.
pub struct ConsoleNotifier;

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(&self, alert: &SwapAlert) -> Result<()> {
        println!("{}\n{}\n{}", "=".repeat(60), format_alert(alert), "=".repeat(60));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> SwapAlert {
        SwapAlert {
            lock_txid: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                .to_string(),
            event: EventTag::Detected,
            btc_amount: Amount::from_sat(15_000_000),
            xmr_amount: Some(22.5),
            btc_xmr_rate: Some(150.0),
            rate_source: Some("coingecko".to_string()),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn formats_amount_with_eight_decimals() {
        let message = format_alert(&sample_alert());
        assert!(message.contains("0.15000000 BTC"));
        assert!(message.contains("≈ 22.5000 XMR"));
        assert!(message.contains("1 BTC = 150.0000 XMR"));
        assert!(message.contains(coingecko::ATTRIBUTION));
    }

    #[test]
    fn omits_rate_lines_when_conversion_missing() {
        let alert = SwapAlert {
            xmr_amount: None,
            btc_xmr_rate: None,
            rate_source: None,
            ..sample_alert()
        };
        let message = format_alert(&alert);
        assert!(!message.contains('≈'));
        assert!(!message.contains("Rate:"));
        assert!(!message.contains(coingecko::ATTRIBUTION));
        assert!(message.contains("0.15000000 BTC"));
    }
}
