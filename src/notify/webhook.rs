use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::json;

use super::{Notifier, SwapAlert, format_alert};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Posts alerts as JSON to an HTTP endpoint. Failures after the in-call
/// retries surface to the orchestrator, which withholds the dedupe mark
/// and redelivers on a later tick.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build webhook http client")?;

        Ok(Self { url, client })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, alert: &SwapAlert) -> Result<()> {
        let body = json!({
            "tx_id": alert.lock_txid,
            "event_tag": alert.event.as_str(),
            "btc_amount": alert.btc_amount_display(),
            "xmr_amount": alert.xmr_amount,
            "btc_xmr_rate": alert.btc_xmr_rate,
            "rate_source": alert.rate_source,
            "timestamp": alert.timestamp,
            "message": format_alert(alert),
        });

        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    tracing::warn!(
                        url = %self.url,
                        status = %resp.status(),
                        attempt,
                        "webhook delivery rejected"
                    );
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, attempt, "webhook delivery failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY * attempt).await;
            }
        }

        anyhow::bail!("webhook delivery failed after {MAX_ATTEMPTS} attempts")
    }
}
