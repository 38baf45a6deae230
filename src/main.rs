//! Settliq demo runner.
//!
//! Wires the full engine against simulated chains and a static price feed,
//! then generates deposits and bets so the sweep and settlement loops can be
//! observed end to end without any external RPC endpoint.

use clap::Parser;
use rand::Rng;
use settliq::{
    chain::WalletRegistry,
    chain_sim::SimulatedChain,
    config::ConfigLoader,
    exchange::{RateGateway, StaticRates},
    register_user, Amount, Blockchain, ChainClient, Currency, DepositSweeper, GameKind, Ledger,
    PayoutBook, ReferralEngine, SettlementEngine, WalletStore, WithdrawalDispatcher,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "settliq", about = "Settlement engine demo against simulated chains")]
struct Args {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    /// How long to run the simulation.
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,

    /// Seconds between simulated blocks.
    #[arg(long, default_value_t = 2)]
    block_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let config = Arc::new(loader.load()?);

    info!("starting settlement engine demo");

    // Price feed and gateway.
    let rates = Arc::new(StaticRates::new());
    rates.set(Currency::Trx, "0.12".parse().unwrap());
    rates.set(Currency::Eth, "3000".parse().unwrap());
    rates.set(Currency::Sol, "150".parse().unwrap());
    rates.set(Currency::Bnb, "550".parse().unwrap());
    let gateway = Arc::new(RateGateway::new(rates.clone(), &config.exchange));

    // Core stores.
    let ledger = Arc::new(Ledger::new());
    let payouts = Arc::new(PayoutBook::new());
    let wallets = Arc::new(WalletStore::new());
    let referral = Arc::new(ReferralEngine::new(config.referral.clone(), payouts.clone()));

    // Simulated chains with funded main pools.
    let tron = Arc::new(SimulatedChain::new(Blockchain::Tron, "TMainPool"));
    let eth = Arc::new(SimulatedChain::new(Blockchain::Ethereum, "0xMainPool"));
    let sol = Arc::new(SimulatedChain::new(Blockchain::Solana, "SoMainPool"));
    tron.fund("TMainPool", Currency::Trx, Amount::from_units(1_000_000));
    eth.fund("0xMainPool", Currency::Eth, Amount::from_units(1_000));
    eth.fund("0xMainPool", Currency::Usdt, Amount::from_units(1_000_000));
    sol.fund("SoMainPool", Currency::Sol, Amount::from_units(10_000));

    let chain_list: Vec<Arc<dyn ChainClient>> = vec![tron.clone(), eth.clone(), sol.clone()];

    // Accounts: user 2 signs up with user 1's referral code.
    register_user(1, None, &chain_list, &wallets, &ledger, &referral).await?;
    register_user(2, Some(1), &chain_list, &wallets, &ledger, &referral).await?;

    // Settlement runs against the chain the hash games live on.
    let settlement = Arc::new(SettlementEngine::new(
        config.clone(),
        tron.clone(),
        ledger.clone(),
        payouts.clone(),
        referral.clone(),
    ));
    let mut handles = settlement.clone().spawn_batch_sweeps();
    handles.push(referral.clone().spawn_expiry_sweep());

    // One deposit sweeper per watched chain; Tron also scans blocks.
    let watchers: [(Arc<dyn ChainClient>, bool); 3] = [
        (tron.clone(), true),
        (eth.clone(), false),
        (sol.clone(), false),
    ];
    for (chain, block_scan) in watchers {
        let registry = WalletRegistry::new(
            wallets.clone(),
            chain.blockchain(),
            Duration::from_secs(config.sweep.wallet_refresh_secs),
        );
        let sweeper = Arc::new(DepositSweeper::new(
            config.clone(),
            chain,
            ledger.clone(),
            gateway.clone(),
            registry,
            referral.clone(),
            block_scan,
        ));
        handles.extend(sweeper.spawn());
    }

    let mut chain_map: HashMap<Blockchain, Arc<dyn ChainClient>> = HashMap::new();
    chain_map.insert(Blockchain::Tron, tron.clone());
    chain_map.insert(Blockchain::Ethereum, eth.clone());
    chain_map.insert(Blockchain::Solana, sol.clone());
    let withdrawals = Arc::new(WithdrawalDispatcher::new(
        config.clone(),
        ledger.clone(),
        gateway,
        chain_map,
    ));

    // Block production.
    for chain in [tron.clone(), eth.clone(), sol.clone()] {
        let period = Duration::from_secs(args.block_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                chain.advance_block();
            }
        }));
    }

    // Activity generator: deposits landing on user 2's Tron wallet and
    // balance bets once funds arrive.
    {
        let tron = tron.clone();
        let wallets = wallets.clone();
        let ledger = ledger.clone();
        let settlement = settlement.clone();
        let withdrawals = withdrawals.clone();
        handles.push(tokio::spawn(async move {
            let deposit_addr = wallets
                .get(2, Blockchain::Tron)
                .expect("user 2 has a tron wallet")
                .public_key;
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let trx = Amount::from_units(rand::thread_rng().gen_range(50..500));
                tron.deposit("TWhale", &deposit_addr, Currency::Trx, trx);
                info!(%trx, "simulated external deposit");

                let usd = ledger.balance(2, Currency::Usd).unwrap_or(Amount::ZERO);
                if usd >= Amount::from_units(20) {
                    let game = GameKind::all()[rand::thread_rng().gen_range(0..5)];
                    match settlement
                        .place_balance_bet(2, game, Amount::from_units(15), Currency::Usd)
                        .await
                    {
                        Ok(bet) => info!(%game, status = ?bet.status, payout = %bet.payout, "bet placed"),
                        Err(err) => warn!(%err, "bet rejected"),
                    }
                }
                if usd >= Amount::from_units(300) {
                    match withdrawals
                        .withdraw(2, "TCashout", Currency::Trx, Blockchain::Tron, Amount::from_units(150))
                        .await
                    {
                        Ok(_) => info!("instant withdrawal dispatched"),
                        Err(err) => warn!(%err, "withdrawal failed"),
                    }
                }
            }
        }));
    }

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
    for handle in &handles {
        handle.abort();
    }

    info!(
        user1_usd = %ledger.balance(1, Currency::Usd).unwrap_or(Amount::ZERO),
        user2_usd = %ledger.balance(2, Currency::Usd).unwrap_or(Amount::ZERO),
        pending_payouts = payouts.pending().len(),
        referral_bonuses = referral.bonuses_for(1).len(),
        "simulation finished"
    );
    Ok(())
}
