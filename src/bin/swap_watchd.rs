use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use comit_swap_watch::chain::esplora::EsploraClient;
use comit_swap_watch::health::{self, Health};
use comit_swap_watch::notify::webhook::WebhookNotifier;
use comit_swap_watch::notify::{ConsoleNotifier, Notifier};
use comit_swap_watch::orchestrator::{Orchestrator, OrchestratorConfig};
use comit_swap_watch::rate::RateConverter;
use comit_swap_watch::rate::coingecko::CoinGeckoSource;
use comit_swap_watch::swap::engine::LifecycleEngine;
use comit_swap_watch::swap::ledger::SwapLedger;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "https://mempool.space/api")]
    esplora_url: String,

    #[arg(long, default_value = "https://api.coingecko.com/api/v3")]
    coingecko_url: String,

    #[arg(long)]
    coingecko_api_key: Option<String>,

    #[arg(long, default_value = "swaps.sqlite3")]
    ledger_path: PathBuf,

    /// Block height to start scanning from; defaults to the current tip.
    #[arg(long)]
    start_height: Option<u32>,

    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 144)]
    max_catchup_blocks: u32,

    #[arg(long, default_value_t = 300)]
    rate_staleness_secs: u64,

    #[arg(long, default_value_t = 6)]
    expiry_grace_blocks: u32,

    #[arg(long, default_value_t = 30)]
    chain_timeout_secs: u64,

    /// Webhook endpoint to notify; may be given multiple times.
    #[arg(long)]
    webhook_url: Vec<String>,

    #[arg(long, default_value = "127.0.0.1:8080")]
    health_listen_addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    comit_swap_watch::logging::init().ok();

    let args = Args::parse();
    let health_listen_addr: SocketAddr = args
        .health_listen_addr
        .parse()
        .context("parse health_listen_addr")?;

    let chain = EsploraClient::new(
        &args.esplora_url,
        Duration::from_secs(args.chain_timeout_secs),
    )
    .context("create esplora client")?;

    let price_source = CoinGeckoSource::new(&args.coingecko_url, args.coingecko_api_key)
        .context("create coingecko source")?;
    let rate = Arc::new(RateConverter::new(
        price_source,
        Duration::from_secs(args.rate_staleness_secs),
    ));

    let ledger = SwapLedger::open(args.ledger_path).context("open swap ledger")?;
    tracing::info!(path = %ledger.path().display(), "swap ledger ready");
    let ledger = Arc::new(Mutex::new(ledger));

    let engine = LifecycleEngine::new(ledger.clone(), rate, args.expiry_grace_blocks);

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(ConsoleNotifier)];
    for url in args.webhook_url {
        tracing::info!(%url, "webhook notifier configured");
        notifiers.push(Box::new(WebhookNotifier::new(url).context("create webhook notifier")?));
    }

    // three missed ticks render the health endpoint degraded
    let health = Health::new(args.poll_interval_secs.saturating_mul(3) as i64);
    tokio::spawn(health::serve(health_listen_addr, health.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let cfg = OrchestratorConfig {
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        start_height: args.start_height,
        max_catchup_blocks: args.max_catchup_blocks,
    };

    tracing::info!(
        esplora_url = %args.esplora_url,
        poll_interval_secs = args.poll_interval_secs,
        "starting swap watcher"
    );

    Orchestrator::new(cfg, chain, engine, ledger, notifiers, health)
        .run(shutdown_rx)
        .await
}
