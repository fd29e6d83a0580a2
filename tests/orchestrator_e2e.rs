mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::Amount;

use comit_swap_watch::health::Health;
use comit_swap_watch::notify::Notifier;
use comit_swap_watch::orchestrator::{Orchestrator, OrchestratorConfig};
use comit_swap_watch::rate::RateConverter;
use comit_swap_watch::swap::engine::LifecycleEngine;
use comit_swap_watch::swap::ledger::SwapLedger;
use comit_swap_watch::swap::{EventTag, SwapState};

use support::{
    RecordingNotifier, StubChainSource, StubPriceSource, lock_tx, redeem_tx, sample_params, tip,
};

struct Fixture {
    orchestrator: Orchestrator<Arc<StubChainSource>, Arc<StubPriceSource>>,
    chain: Arc<StubChainSource>,
    price: Arc<StubPriceSource>,
    notifier: Arc<RecordingNotifier>,
    ledger: Arc<Mutex<SwapLedger>>,
    health: Health,
}

fn fixture(dir: &tempfile::TempDir, start_height: u32) -> Result<Fixture> {
    let chain = Arc::new(StubChainSource::default());
    let price = StubPriceSource::with_rate(150.0);
    let notifier = Arc::new(RecordingNotifier::default());

    let ledger = SwapLedger::open(dir.path().join("swaps.sqlite3")).context("open ledger")?;
    let ledger = Arc::new(Mutex::new(ledger));
    let rate = Arc::new(RateConverter::new(price.clone(), Duration::from_secs(300)));
    let engine = LifecycleEngine::new(ledger.clone(), rate, 6);
    let health = Health::new(3600);

    let cfg = OrchestratorConfig {
        poll_interval: Duration::from_millis(10),
        start_height: Some(start_height),
        max_catchup_blocks: 144,
    };
    let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(notifier.clone())];

    let orchestrator = Orchestrator::new(
        cfg,
        chain.clone(),
        engine,
        ledger.clone(),
        notifiers,
        health.clone(),
    );

    Ok(Fixture {
        orchestrator,
        chain,
        price,
        notifier,
        ledger,
        health,
    })
}

#[tokio::test]
async fn lock_then_redeem_notifies_once_each_with_lock_time_rate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut fx = fixture(&dir, 100)?;

    let params = sample_params(712_345);
    let lock = lock_tx(1, &params, Amount::from_sat(15_000_000));
    let redeem = redeem_tx(2, &lock, &params);

    fx.chain.set_tip(tip(100));
    fx.chain.set_block(100, vec![lock.clone()]);
    fx.orchestrator.tick().await?;

    // the rate moves before the redeem is observed
    fx.price.set_rate(200.0);

    fx.chain.set_tip(tip(101));
    fx.chain.set_block(101, vec![redeem.clone()]);
    fx.orchestrator.tick().await?;

    let swap = fx
        .ledger
        .lock()
        .unwrap()
        .get(&lock.txid.to_string())?
        .context("swap missing")?;
    assert_eq!(swap.state, SwapState::Redeemed);
    assert_eq!(swap.redeem_txid, Some(redeem.txid.to_string()));

    let tags = fx.notifier.sent_tags();
    assert_eq!(
        tags,
        vec![
            (lock.txid.to_string(), "detected".to_string()),
            (lock.txid.to_string(), "redeemed".to_string()),
        ]
    );

    // both alerts carry the conversion captured at lock time
    for alert in fx.notifier.alerts() {
        assert_eq!(alert.btc_xmr_rate, Some(150.0));
        let xmr = alert.xmr_amount.context("xmr amount missing")?;
        assert!((xmr - 22.5).abs() < 1e-9);
        assert_eq!(alert.btc_amount_display(), "0.15000000");
    }

    // a further tick with nothing new must not re-notify
    fx.chain.set_tip(tip(101));
    fx.orchestrator.tick().await?;
    assert_eq!(fx.notifier.sent_tags().len(), 2);

    assert!(fx.health.is_healthy());

    Ok(())
}

#[tokio::test]
async fn overlapping_windows_deliver_one_swap_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut fx = fixture(&dir, 100)?;

    let params = sample_params(712_345);
    let lock = lock_tx(1, &params, Amount::from_sat(15_000_000));

    fx.chain.set_tip(tip(100));
    fx.chain.set_block(100, vec![lock.clone()]);
    fx.orchestrator.tick().await?;

    // the provider returns an overlapping window: the same lock appears
    // again in the next block
    fx.chain.set_tip(tip(101));
    fx.chain.set_block(101, vec![lock.clone()]);
    fx.orchestrator.tick().await?;

    let recent = fx.ledger.lock().unwrap().recent_swaps(10)?;
    assert_eq!(recent.len(), 1);
    assert_eq!(fx.notifier.sent_tags().len(), 1);

    Ok(())
}

#[tokio::test]
async fn failed_dispatch_is_retried_until_acked_then_deduped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut fx = fixture(&dir, 100)?;

    let params = sample_params(712_345);
    let lock = lock_tx(1, &params, Amount::from_sat(15_000_000));

    fx.notifier.set_failing(true);
    fx.chain.set_tip(tip(100));
    fx.chain.set_block(100, vec![lock.clone()]);
    fx.orchestrator.tick().await?;

    assert!(fx.notifier.sent_tags().is_empty());
    {
        let ledger = fx.ledger.lock().unwrap();
        assert!(!ledger.was_notified(&lock.txid.to_string(), EventTag::Detected)?);
    }

    // transport recovers; the withheld event goes out on the next pass
    fx.notifier.set_failing(false);
    fx.chain.set_tip(tip(100));
    fx.orchestrator.tick().await?;
    assert_eq!(fx.notifier.sent_tags().len(), 1);

    // and only once
    fx.orchestrator.tick().await?;
    assert_eq!(fx.notifier.sent_tags().len(), 1);

    Ok(())
}

#[tokio::test]
async fn provider_outage_fails_tick_without_crashing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut fx = fixture(&dir, 100)?;

    // no tip configured: the chain source errors
    let err = fx.orchestrator.tick().await.unwrap_err();
    assert!(err.to_string().contains("fetch chain tip"));
    // the run loop records failures; the test drives ticks directly
    fx.health.record_tick_failure();
    assert!(!fx.health.is_healthy());

    // provider recovers and the next tick proceeds
    fx.chain.set_tip(tip(100));
    fx.orchestrator.tick().await?;
    assert!(fx.health.is_healthy());

    Ok(())
}

#[tokio::test]
async fn expiry_is_notified_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut fx = fixture(&dir, 100)?;

    let params = sample_params(200);
    let lock = lock_tx(1, &params, Amount::from_sat(15_000_000));

    fx.chain.set_tip(tip(100));
    fx.chain.set_block(100, vec![lock.clone()]);
    fx.orchestrator.tick().await?;

    // tip sails past the timelock plus grace with no spend in sight
    fx.chain.set_tip(tip(300));
    fx.orchestrator.tick().await?;
    fx.orchestrator.tick().await?;

    let swap = fx
        .ledger
        .lock()
        .unwrap()
        .get(&lock.txid.to_string())?
        .context("swap missing")?;
    assert_eq!(swap.state, SwapState::Expired);

    let tags: Vec<String> = fx
        .notifier
        .sent_tags()
        .into_iter()
        .map(|(_, tag)| tag)
        .collect();
    assert_eq!(tags, vec!["detected".to_string(), "expired".to_string()]);

    Ok(())
}
