use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use reward_maker::config::Cli;
use reward_maker::errors::AgentError;
use reward_maker::feeds::market_data::{market_data_feed, MarketDataEvent};
use reward_maker::feeds::user_trade::{user_trade_feed, UserTradeCredentials};
use reward_maker::gateway::exchange::{ExchangeClient, PolymarketExchangeClient};
use reward_maker::gateway::settlement::{AlloySettlementClient, SettlementClient};
use reward_maker::market_maker::{run_market_maker, MarketMakerConfig, SwitchObserver};
use reward_maker::metadata::GammaMetadataClient;
use reward_maker::orchestrator::{Orchestrator, Phase, SharedSwitchFlag};
use reward_maker::persistence;
use reward_maker::tracker::{Limits, PositionTracker};
use reward_maker::types::{ExitReason, Market, MarketEvent};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("[MAIN] fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    cli.validate()?;

    eprintln!("╔══════════════════════════════════════════════════╗");
    eprintln!("║  reward-maker");
    eprintln!("║  liquidity=${:.0} order_size={:.0} spread={:.2}", cli.liquidity, cli.order_size, cli.spread);
    eprintln!("║  dry_run={} switching={}", cli.dry_run(), cli.enable_switching);
    eprintln!("╚══════════════════════════════════════════════════╝");

    let data_dir = std::path::PathBuf::from(&cli.data_dir);
    std::fs::create_dir_all(&data_dir).map_err(|e| AgentError::Config(format!("cannot create data dir: {e}")))?;

    let dry_run = cli.dry_run();
    let exchange = Arc::new(
        PolymarketExchangeClient::connect(
            &cli.clob_url,
            cli.funder_private_key.as_deref(),
            cli.signature_type,
            cli.polymarket_funder_address.as_deref(),
            dry_run,
        )
        .await?,
    );

    let settlement: Arc<dyn SettlementClient> = Arc::new(build_settlement_client(&cli, dry_run)?);
    let metadata = Arc::new(GammaMetadataClient::new(cli.gamma_api_url.clone()));
    let switch_flag = SharedSwitchFlag::default();

    let mut orchestrator = Orchestrator::new(
        cli.to_orchestrator_config(),
        exchange.clone(),
        settlement.clone(),
        metadata,
        switch_flag.clone(),
    );

    let now_ms = chrono::Utc::now().timestamp_millis();
    orchestrator.startup(now_ms).await?;

    if orchestrator.phase() == Phase::Shutdown {
        eprintln!("[MAIN] check-positions-only: exiting after startup report");
        return Ok(());
    }

    let mm_config = MarketMakerConfig {
        spread_fraction: cli.spread,
        order_size: cli.order_size,
        rebalance_threshold: 0.01,
        debounce_ms: 50,
        fallback_ms: 5_000,
        merge_enabled: true,
        min_merge_amount: 1.0,
    };

    loop {
        let Some(market) = orchestrator.current_market().cloned() else {
            break;
        };
        market.validate()?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let ledger = persistence::load_fill_ledger(&data_dir, &market.condition_id).map_err(AgentError::Persistence)?;
        let limits = Limits {
            max_net_exposure: cli.max_net_exposure,
            warn_threshold: cli.warn_threshold,
        };

        let yes_balance = exchange.get_balance(&market.yes_token_id).await.map(|b| b.balance).unwrap_or(0.0);
        let no_balance = exchange.get_balance(&market.no_token_id).await.map(|b| b.balance).unwrap_or(0.0);

        let (tracker, history) = match &ledger {
            Some(l) => {
                let initial_cost_basis = l.initial_cost_basis.as_ref().map(|b| (b.yes_avg_cost, b.no_avg_cost));
                let (t, warning) = PositionTracker::resume(
                    market.condition_id.clone(),
                    market.yes_token_id.clone(),
                    market.no_token_id.clone(),
                    l.initial_position,
                    initial_cost_basis,
                    &l.fills,
                    yes_balance,
                    no_balance,
                    limits,
                );
                if let Some(w) = warning {
                    eprintln!(
                        "[MAIN] reconciliation warning on {}: yes={:.4} no={:.4}",
                        market.condition_id, w.yes_discrepancy, w.no_discrepancy
                    );
                }
                (t, l.fills.clone())
            }
            None => (
                PositionTracker::new_fresh(
                    market.condition_id.clone(),
                    market.yes_token_id.clone(),
                    market.no_token_id.clone(),
                    yes_balance,
                    no_balance,
                    now_ms,
                    limits,
                ),
                Vec::new(),
            ),
        };

        let (event_tx, event_rx) = mpsc::channel::<MarketEvent>(256);

        let md_handle = tokio::spawn(spawn_midpoint_bridge(
            cli.clob_ws_url.clone(),
            market.yes_token_id.clone(),
            event_tx.clone(),
            exchange.clone(),
            mm_config.fallback_ms,
        ));
        let ut_handle = spawn_user_trade_bridge(&cli, &market, event_tx.clone());

        let switch_observer: Arc<dyn SwitchObserver> = Arc::new(switch_flag.clone());
        let mut mm_fut = Box::pin(run_market_maker(
            market.clone(),
            tracker,
            exchange.clone(),
            settlement.clone(),
            switch_observer,
            mm_config,
            event_rx,
            None,
            &data_dir,
            history,
        ));

        let mut reeval_interval = tokio::time::interval(tokio::time::Duration::from_millis(
            (cli.re_evaluate_interval_min * 60_000.0).max(30_000.0) as u64,
        ));
        let mut liquidation_interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        reeval_interval.tick().await;
        liquidation_interval.tick().await;

        let (exit, final_tracker) = loop {
            tokio::select! {
                result = &mut mm_fut => break result,
                _ = reeval_interval.tick(), if cli.enable_switching => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = orchestrator.reevaluate(now_ms).await {
                        eprintln!("[MAIN] re-evaluation failed: {e}");
                    }
                    let _ = event_tx.send(MarketEvent::CheckSwitch).await;
                }
                _ = liquidation_interval.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = orchestrator.manage_liquidations(now_ms).await {
                        eprintln!("[MAIN] liquidation sweep failed: {e}");
                    }
                }
            }
        };

        md_handle.abort();
        if let Some(h) = ut_handle {
            h.abort();
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let shutdown_requested = matches!(exit, ExitReason::Shutdown);
        orchestrator.handle_exit(exit, final_tracker, now_ms).await?;
        if shutdown_requested || orchestrator.phase() == Phase::Shutdown {
            break;
        }
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    orchestrator.shutdown(now_ms).await?;
    Ok(())
}

fn build_settlement_client(cli: &Cli, dry_run: bool) -> Result<AlloySettlementClient, AgentError> {
    if dry_run {
        return AlloySettlementClient::new(
            cli.rpc_url.clone().unwrap_or_default(),
            cli.collateral_token_address.as_deref().unwrap_or("0x0000000000000000000000000000000000000000"),
            cli.ctf_contract_address.as_deref().unwrap_or("0x0000000000000000000000000000000000000000"),
            cli.funder_private_key
                .as_deref()
                .unwrap_or("0000000000000000000000000000000000000000000000000000000000000001"),
            true,
        );
    }
    let rpc_url = cli.rpc_url.clone().ok_or_else(|| AgentError::Config("--rpc-url required outside dry-run".into()))?;
    let collateral = cli
        .collateral_token_address
        .clone()
        .ok_or_else(|| AgentError::Config("--collateral-token required outside dry-run".into()))?;
    let ctf = cli
        .ctf_contract_address
        .clone()
        .ok_or_else(|| AgentError::Config("--ctf-address required outside dry-run".into()))?;
    let pk = cli
        .funder_private_key
        .clone()
        .ok_or_else(|| AgentError::Config("--private-key required outside dry-run".into()))?;
    AlloySettlementClient::new(rpc_url, &collateral, &ctf, &pk, false)
}

/// Bridges the market-data WS feed into the market maker's event channel.
/// On disconnect, immediately starts a REST `get_midpoint` poll at
/// `fallback_ms` cadence and keeps it running until the WS feed reports a
/// fresh update (§4.4 item 3, §7).
async fn spawn_midpoint_bridge(
    ws_url: String,
    seed_token_id: String,
    event_tx: mpsc::Sender<MarketEvent>,
    exchange: Arc<dyn ExchangeClient>,
    fallback_ms: u64,
) {
    let (md_tx, mut md_rx) = mpsc::channel(256);
    let feed = tokio::spawn(market_data_feed(md_tx, ws_url, vec![seed_token_id.clone()]));
    let mut fallback: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(event) = md_rx.recv().await {
        match event {
            MarketDataEvent::Update(update) => {
                if let Some(h) = fallback.take() {
                    h.abort();
                }
                if event_tx.send(MarketEvent::MidpointUpdate(update.midpoint)).await.is_err() {
                    break;
                }
            }
            MarketDataEvent::Disconnected => {
                if fallback.is_some() {
                    continue;
                }
                eprintln!("[MAIN] market data stream down, starting REST fallback poll every {fallback_ms}ms");
                let tx = event_tx.clone();
                let exch = exchange.clone();
                let token = seed_token_id.clone();
                fallback = Some(tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_millis(fallback_ms));
                    loop {
                        interval.tick().await;
                        match exch.get_midpoint(&token).await {
                            Ok(mid) => {
                                if tx.send(MarketEvent::Tick(mid)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => eprintln!("[MAIN] fallback poll failed: {e}"),
                        }
                    }
                }));
            }
        }
    }
    if let Some(h) = fallback.take() {
        h.abort();
    }
    feed.abort();
}

/// Spawns the authenticated user-trade bridge when credentials are configured.
/// Every confirmed fill is forwarded into the market maker's event channel,
/// which persists it into the ledger as it's applied (§4.2, §5).
fn spawn_user_trade_bridge(cli: &Cli, market: &Market, event_tx: mpsc::Sender<MarketEvent>) -> Option<tokio::task::JoinHandle<()>> {
    let (api_key, api_secret, api_passphrase) = match (&cli.api_key, &cli.api_secret, &cli.api_passphrase) {
        (Some(k), Some(s), Some(p)) => (k.clone(), s.clone(), p.clone()),
        _ => {
            eprintln!("[MAIN] no user-trade credentials configured, fills will not be observed live");
            return None;
        }
    };
    let ws_url = cli.user_ws_url.clone();
    let condition_id = market.condition_id.clone();
    Some(tokio::spawn(async move {
        let (fill_tx, mut fill_rx) = mpsc::channel(256);
        let feed = tokio::spawn(user_trade_feed(
            fill_tx,
            ws_url,
            UserTradeCredentials {
                api_key,
                secret: api_secret,
                passphrase: api_passphrase,
            },
            condition_id,
        ));
        while let Some(fill) = fill_rx.recv().await {
            if event_tx.send(MarketEvent::Fill(fill)).await.is_err() {
                break;
            }
        }
        feed.abort();
    }))
}
