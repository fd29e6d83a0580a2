use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};

use crate::chain::ChainSource;
use crate::error::WatchError;
use crate::health::Health;
use crate::notify::{Notifier, SwapAlert};
use crate::rate::PriceSource;
use crate::swap::engine::{LifecycleEngine, SwapEvent};
use crate::swap::ledger::SwapLedger;
use crate::swap::{EventTag, SwapRecord};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// First block height to scan; `None` starts at the current tip.
    pub start_height: Option<u32>,
    /// Cap on blocks processed per tick when catching up.
    pub max_catchup_blocks: u32,
}

/// Drives the polling cadence: fetches candidate transactions, feeds them
/// to the lifecycle engine, and dispatches notifications for transitions
/// the ledger has not yet seen acknowledged.
pub struct Orchestrator<C, S> {
    cfg: OrchestratorConfig,
    chain: C,
    engine: LifecycleEngine<S>,
    ledger: Arc<Mutex<SwapLedger>>,
    notifiers: Vec<Box<dyn Notifier>>,
    health: Health,
    next_height: Option<u32>,
}

impl<C: ChainSource, S: PriceSource> Orchestrator<C, S> {
    pub fn new(
        cfg: OrchestratorConfig,
        chain: C,
        engine: LifecycleEngine<S>,
        ledger: Arc<Mutex<SwapLedger>>,
        notifiers: Vec<Box<dyn Notifier>>,
        health: Health,
    ) -> Self {
        let next_height = cfg.start_height;
        Self {
            cfg,
            chain,
            engine,
            ledger,
            notifiers,
            health,
            next_height,
        }
    }

    /// Poll until `shutdown` flips to true. A failed tick backs off
    /// exponentially (capped at 8x the poll interval) and never crashes
    /// the loop; cancellation happens between ticks so no partial ledger
    /// write is ever left behind.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut delay = self.cfg.poll_interval;

        loop {
            match self.tick().await {
                Ok(()) => {
                    delay = self.cfg.poll_interval;
                }
                Err(err) => {
                    self.health.record_tick_failure();
                    delay = (delay * 2).min(self.cfg.poll_interval * 8);
                    tracing::warn!(
                        error = %format!("{err:#}"),
                        retry_in_secs = delay.as_secs(),
                        "polling tick failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, stopping polling loop");
                return Ok(());
            }
        }
    }

    /// One polling pass: ingest new blocks, sweep expiries, dispatch
    /// pending notifications.
    pub async fn tick(&mut self) -> Result<()> {
        let tip = self.chain.tip().await.context("fetch chain tip")?;

        let start = self.next_height.unwrap_or(tip.height);
        let end = tip
            .height
            .min(start.saturating_add(self.cfg.max_catchup_blocks.saturating_sub(1)));

        let mut events: Vec<SwapEvent> = Vec::new();
        for height in start..=end {
            let txs = self
                .chain
                .block_txs(height)
                .await
                .with_context(|| format!("fetch block {height}"))?;

            for tx in &txs {
                events.extend(self.engine.process_transaction(tx).await?);
            }

            // advance only once the whole block is durably applied, so a
            // persistence failure replays the same window next tick
            self.next_height = Some(height + 1);
            tracing::debug!(height, tx_count = txs.len(), "processed block");
        }

        events.extend(self.engine.sweep_expired(&tip)?);

        for event in events {
            self.dispatch(&event.swap, event.tag).await?;
        }

        // catch transitions whose dispatch failed on earlier ticks or in
        // earlier runs of the process
        let pending = {
            let ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.pending_notifications()?
        };
        for (swap, tag) in pending {
            self.dispatch(&swap, tag).await?;
        }

        let swaps_tracked = {
            let ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.open_swaps()?.len() as u64
        };
        self.health.record_tick_ok(tip.height, swaps_tracked);

        Ok(())
    }

    /// Send `tag` for a swap unless the ledger already saw it acknowledged.
    /// The dedupe mark is written only after every transport succeeded;
    /// a failed transport leaves the event pending for the next tick.
    async fn dispatch(&self, swap: &SwapRecord, tag: EventTag) -> Result<(), WatchError> {
        let already = {
            let ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.was_notified(&swap.lock_txid, tag)?
        };
        if already {
            return Ok(());
        }

        let alert = SwapAlert::from_event(&SwapEvent {
            swap: swap.clone(),
            tag,
        });

        let mut all_ok = true;
        for notifier in &self.notifiers {
            if let Err(err) = notifier.notify(&alert).await {
                all_ok = false;
                tracing::warn!(
                    lock_txid = %swap.lock_txid,
                    tag = tag.as_str(),
                    notifier = notifier.name(),
                    error = %format!("{err:#}"),
                    "notification dispatch failed, will retry"
                );
            }
        }

        if all_ok {
            let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.mark_notified(&swap.lock_txid, tag)?;
            tracing::info!(
                lock_txid = %swap.lock_txid,
                tag = tag.as_str(),
                "notification delivered"
            );
        }

        Ok(())
    }
}
