//! Cached BTC→XMR conversion backed by an external price source.

pub mod coingecko;

use std::time::{Duration, Instant};

use anyhow::Result;
use bitcoin::Amount;
use tokio::sync::Mutex;

use crate::error::WatchError;

/// Base delay before re-attempting a failed refresh.
const REFRESH_BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Cap on the refresh backoff.
const REFRESH_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// External price collaborator. May rate-limit or fail; the converter falls
/// back to the last known rate.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    fn label(&self) -> &'static str;

    /// Current XMR-per-BTC ratio (1 BTC = `n` XMR).
    async fn xmr_per_btc(&self) -> Result<f64>;
}

#[async_trait::async_trait]
impl<T: PriceSource + ?Sized> PriceSource for std::sync::Arc<T> {
    fn label(&self) -> &'static str {
        (**self).label()
    }

    async fn xmr_per_btc(&self) -> Result<f64> {
        (**self).xmr_per_btc().await
    }
}

/// A fetched rate. Immutable once cached; replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct ExchangeRate {
    pub xmr_per_btc: f64,
    pub fetched_at: Instant,
    pub source: &'static str,
}

/// Result of converting a BTC amount.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub xmr_amount: f64,
    pub rate: ExchangeRate,
    /// True when the rate used is older than the staleness threshold
    /// because a refresh failed.
    pub degraded: bool,
}

#[derive(Debug, Default)]
struct RateCache {
    rate: Option<ExchangeRate>,
    last_attempt: Option<Instant>,
    failures: u32,
}

impl RateCache {
    fn refresh_due(&self, now: Instant) -> bool {
        if self.failures == 0 {
            return true;
        }
        let backoff = REFRESH_BACKOFF_BASE
            .saturating_mul(1u32 << self.failures.saturating_sub(1).min(10))
            .min(REFRESH_BACKOFF_MAX);
        self.last_attempt
            .is_none_or(|at| now.duration_since(at) >= backoff)
    }
}

/// Holds a time-bounded cached exchange rate and converts BTC amounts to
/// their XMR equivalent.
pub struct RateConverter<S> {
    source: S,
    staleness: Duration,
    cache: Mutex<RateCache>,
}

impl<S: PriceSource> RateConverter<S> {
    pub fn new(source: S, staleness: Duration) -> Self {
        Self {
            source,
            staleness,
            cache: Mutex::new(RateCache::default()),
        }
    }

    /// Convert `amount` using the cached rate, refreshing it first when
    /// stale. Refresh failures fall back to the last known rate (flagged
    /// degraded); with no rate ever fetched this is `RateUnavailable` and
    /// the caller proceeds without an XMR figure.
    ///
    /// The cache lock is held across the refresh, so concurrent callers
    /// during a stale period wait for the in-flight fetch and reuse its
    /// result instead of issuing duplicate requests.
    pub async fn convert(&self, amount: Amount) -> Result<Conversion, WatchError> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let fresh = cache
            .rate
            .as_ref()
            .is_some_and(|rate| now.duration_since(rate.fetched_at) < self.staleness);

        if !fresh && cache.refresh_due(now) {
            cache.last_attempt = Some(now);
            match self.source.xmr_per_btc().await {
                Ok(xmr_per_btc) => {
                    cache.failures = 0;
                    cache.rate = Some(ExchangeRate {
                        xmr_per_btc,
                        fetched_at: now,
                        source: self.source.label(),
                    });
                }
                Err(err) => {
                    cache.failures += 1;
                    tracing::warn!(
                        error = %format!("{err:#}"),
                        failures = cache.failures,
                        source = self.source.label(),
                        "rate refresh failed, falling back to last known rate"
                    );
                }
            }
        }

        let Some(rate) = cache.rate.clone() else {
            return Err(WatchError::RateUnavailable);
        };

        let degraded = now.duration_since(rate.fetched_at) >= self.staleness;

        Ok(Conversion {
            xmr_amount: amount.to_btc() * rate.xmr_per_btc,
            rate,
            degraded,
        })
    }
}
