//! Settliq - ledger-consistency and settlement engine for a multi-currency
//! gaming platform.
//!
//! The crate owns the paths where money moves between shared state: atomic
//! balance mutation, provably-fair bet settlement, deposit sweeping across
//! chains, withdrawal dispatch and referral bonus accrual. HTTP routing,
//! session handling and admin tooling live in collaborating services that
//! call into these components.

pub mod chain;
pub mod chain_sim;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod games;
pub mod ledger;
pub mod money;
pub mod payout;
pub mod referral;
pub mod seamless;
pub mod settlement;
pub mod sweep;
pub mod withdraw;

pub use chain::{ChainClient, Wallet, WalletRegistry, WalletStore};
pub use config::{ConfigLoader, EngineConfig};
pub use errors::{EngineError, EngineResult};
pub use exchange::{PriceSource, RateGateway};
pub use games::{BatchType, Bet, BetOrigin, BetStatus, GameKind};
pub use ledger::Ledger;
pub use money::{Amount, Blockchain, Currency, UserId};
pub use payout::{Payout, PayoutBook, PayoutStatus};
pub use referral::ReferralEngine;
pub use seamless::OperatorGateway;
pub use settlement::SettlementEngine;
pub use sweep::DepositSweeper;
pub use withdraw::{WithdrawOutcome, WithdrawalDispatcher};

use std::sync::Arc;

/// Register a new account: custodial wallets on every configured chain, a
/// zeroed USD balance row and, when a referral code was used, the referrer
/// link plus the signup bonus accrual.
pub async fn register_user(
    user_id: UserId,
    referrer: Option<UserId>,
    chains: &[Arc<dyn ChainClient>],
    wallets: &WalletStore,
    ledger: &Ledger,
    referral: &ReferralEngine,
) -> EngineResult<()> {
    chain::provision_wallets(user_id, chains, wallets).await?;
    ledger.open_account(user_id);

    if let Some(referrer) = referrer {
        referral.link(user_id, referrer)?;
        referral.on_signup(user_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_sim::SimulatedChain;

    #[tokio::test]
    async fn registration_provisions_wallets_and_signup_bonus() {
        let chains: Vec<Arc<dyn ChainClient>> = vec![
            Arc::new(SimulatedChain::new(Blockchain::Tron, "Tpool")),
            Arc::new(SimulatedChain::new(Blockchain::Solana, "Spool")),
        ];
        let wallets = WalletStore::new();
        let ledger = Ledger::new();
        let payouts = Arc::new(PayoutBook::new());
        let referral = ReferralEngine::new(config::ReferralConfig::default(), payouts);

        register_user(1, None, &chains, &wallets, &ledger, &referral)
            .await
            .unwrap();
        register_user(2, Some(1), &chains, &wallets, &ledger, &referral)
            .await
            .unwrap();

        assert!(wallets.get(2, Blockchain::Tron).is_some());
        assert!(wallets.get(2, Blockchain::Solana).is_some());
        assert_eq!(ledger.balance(2, Currency::Usd), Some(Amount::ZERO));
        assert_eq!(referral.bonuses_for(1).len(), 1);
        assert_eq!(referral.team_size(1), 1);
    }
}
