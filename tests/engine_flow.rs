//! End-to-end flow: register, deposit, sweep, bet, withdraw, referral
//! conversion. Everything runs against simulated chains and a static price
//! feed; the sweep and settlement cycles are driven by hand so assertions
//! are deterministic.

use settliq::{
    chain::WalletRegistry,
    chain_sim::SimulatedChain,
    config::EngineConfig,
    exchange::{RateGateway, StaticRates},
    payout::PayoutStatus,
    register_user, Amount, BatchType, BetStatus, Blockchain, ChainClient, Currency,
    DepositSweeper, GameKind, Ledger, PayoutBook, ReferralEngine, SettlementEngine, WalletStore,
    WithdrawOutcome, WithdrawalDispatcher,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct World {
    config: Arc<EngineConfig>,
    tron: Arc<SimulatedChain>,
    ledger: Arc<Ledger>,
    payouts: Arc<PayoutBook>,
    wallets: Arc<WalletStore>,
    referral: Arc<ReferralEngine>,
    settlement: Arc<SettlementEngine>,
    sweeper: DepositSweeper,
    withdrawals: WithdrawalDispatcher,
}

async fn build_world() -> World {
    let config = Arc::new(EngineConfig::default());

    let rates = Arc::new(StaticRates::new());
    rates.set(Currency::Trx, "0.10".parse().unwrap());
    let gateway = Arc::new(RateGateway::new(rates, &config.exchange));

    let tron = Arc::new(SimulatedChain::new(Blockchain::Tron, "TMainPool"));
    tron.fund("TMainPool", Currency::Trx, Amount::from_units(1_000_000));

    let ledger = Arc::new(Ledger::new());
    let payouts = Arc::new(PayoutBook::new());
    let wallets = Arc::new(WalletStore::new());
    let referral = Arc::new(ReferralEngine::new(config.referral.clone(), payouts.clone()));

    let chains: Vec<Arc<dyn ChainClient>> = vec![tron.clone()];
    register_user(1, None, &chains, &wallets, &ledger, &referral)
        .await
        .unwrap();
    register_user(2, Some(1), &chains, &wallets, &ledger, &referral)
        .await
        .unwrap();

    let settlement = Arc::new(SettlementEngine::new(
        config.clone(),
        tron.clone(),
        ledger.clone(),
        payouts.clone(),
        referral.clone(),
    ));

    let registry = WalletRegistry::new(wallets.clone(), Blockchain::Tron, Duration::from_millis(0));
    let sweeper = DepositSweeper::new(
        config.clone(),
        tron.clone(),
        ledger.clone(),
        gateway.clone(),
        registry,
        referral.clone(),
        true,
    );

    let mut chain_map: HashMap<Blockchain, Arc<dyn ChainClient>> = HashMap::new();
    chain_map.insert(Blockchain::Tron, tron.clone());
    let withdrawals =
        WithdrawalDispatcher::new(config.clone(), ledger.clone(), gateway, chain_map);

    World {
        config,
        tron,
        ledger,
        payouts,
        wallets,
        referral,
        settlement,
        sweeper,
        withdrawals,
    }
}

#[tokio::test]
async fn deposit_to_payout_full_cycle() {
    let w = build_world().await;
    assert_eq!(w.config.withdraw.instant_limit_usd, 200.0);

    // Signup through user 1's code accrued the flat signup bonus.
    assert_eq!(w.referral.bonuses_for(1).len(), 1);

    // An external whale sends 3000 TRX to user 2's custodial address.
    let deposit_addr = w.wallets.get(2, Blockchain::Tron).unwrap().public_key;
    w.tron
        .deposit("TWhale", &deposit_addr, Currency::Trx, Amount::from_units(3_000));
    w.tron.advance_block();

    w.sweeper.block_scan_cycle().await.unwrap();

    // 2999.9 TRX swept at 0.10 USD -> 299.99 USD credited once.
    let after_deposit: Amount = "299.99".parse().unwrap();
    assert_eq!(w.ledger.balance(2, Currency::Usd), Some(after_deposit));

    // Replaying the scan must not double-credit.
    w.sweeper.block_scan_cycle().await.unwrap();
    w.sweeper.balance_scan_cycle().await;
    assert_eq!(w.ledger.balance(2, Currency::Usd), Some(after_deposit));
    assert_eq!(w.ledger.transactions_for(2).len(), 1);

    // Deposit triggers accrued for the referrer: signup + deposit +
    // first_deposit.
    assert_eq!(w.referral.bonuses_for(1).len(), 3);

    // User 2 wagers 15 USD on odd/even against a pinned Odd block.
    w.tron.advance_block_with_hash("00000000000000a3");
    let bet = w
        .settlement
        .place_balance_bet(2, GameKind::OddEven, Amount::from_units(15), Currency::Usd)
        .await
        .unwrap();
    assert_eq!(bet.status, BetStatus::Win);
    assert_eq!(bet.payout, "28.9575".parse().unwrap());

    // Re-running the sweeps never resettles the bet.
    let resettled = w
        .settlement
        .settle_due(&[BatchType::OneMinute, BatchType::Instant])
        .await;
    assert_eq!(resettled, 0);

    // 299.99 - 15 + 28.9575
    let after_bet: Amount = "313.9475".parse().unwrap();
    assert_eq!(w.ledger.balance(2, Currency::Usd), Some(after_bet));

    // Instant withdrawal of 150 USD in TRX.
    let outcome = w
        .withdrawals
        .withdraw(2, "TCashout", Currency::Trx, Blockchain::Tron, Amount::from_units(150))
        .await
        .unwrap();
    match outcome {
        WithdrawOutcome::Instant { sent, .. } => assert_eq!(sent, Amount::from_units(1_500)),
        WithdrawOutcome::Queued(_) => panic!("150 USD must pay instantly"),
    }
    assert_eq!(
        w.tron.on_chain_balance("TCashout", Currency::Trx),
        Amount::from_units(1_500)
    );

    assert_eq!(
        w.ledger.balance(2, Currency::Usd),
        Some("163.9475".parse().unwrap())
    );
    // The withdrawal left an audit row alongside the deposit.
    assert_eq!(w.ledger.transactions_for(2).len(), 2);
}

#[tokio::test]
async fn queued_withdrawal_flow() {
    let w = build_world().await;
    w.ledger.credit(2, Currency::Usd, Amount::from_units(1_000)).unwrap();

    let request = match w
        .withdrawals
        .withdraw(2, "TBig", Currency::Trx, Blockchain::Tron, "200.01".parse().unwrap())
        .await
        .unwrap()
    {
        WithdrawOutcome::Queued(request) => request,
        WithdrawOutcome::Instant { .. } => panic!("200.01 must queue"),
    };
    assert_eq!(w.ledger.balance(2, Currency::Usd), Some("799.99".parse().unwrap()));

    let done = w.withdrawals.process_withdraw(&request.id).await.unwrap();
    assert!(done.completed_tx.is_some());
    // 200.01 USD at 0.10 USD/TRX.
    assert_eq!(
        w.tron.on_chain_balance("TBig", Currency::Trx),
        "2000.1".parse().unwrap()
    );
    assert!(w.withdrawals.process_withdraw(&request.id).await.is_err());
}

#[tokio::test]
async fn referral_bonus_converts_into_a_paid_payout() {
    let w = build_world().await;

    // Accrue enough bonus mass for a conversion.
    w.referral
        .accrue(2, Amount::from_units(40), Currency::Usd, settliq::referral::TriggerType::Deposit)
        .unwrap();

    let payout = w
        .referral
        .convert_to_payout(1, Amount::from_units(30), Currency::Usd)
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Pending);

    let done = w.payouts.complete_internal(&payout.id, &w.ledger).unwrap();
    assert_eq!(done.status, PayoutStatus::Completed);
    assert_eq!(w.ledger.balance(1, Currency::Usd), Some(Amount::from_units(30)));

    // Completion is exactly-once.
    assert!(w.payouts.complete_internal(&payout.id, &w.ledger).is_err());
}
