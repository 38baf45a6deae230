//! Blockchain access seam.
//!
//! The engine never talks RPC directly: every chain exposes the
//! [`ChainClient`] interface for block reads, balance queries and transfers.
//! Custodial wallets live in a [`WalletStore`]; sweep loops read them through
//! a [`WalletRegistry`], an explicitly owned cache with a refresh contract.

use crate::errors::{EngineError, EngineResult};
use crate::money::{Amount, Blockchain, Currency, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A block reference: height plus the hash games seed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

/// Custodial keypair held on behalf of a user. Created once at registration,
/// never rotated. The private key is encrypted at rest and opaque to the
/// engine; only the owning chain client can use it to sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub blockchain: Blockchain,
    pub public_key: String,
    pub encrypted_private_key: String,
}

/// An inbound transfer observed on-chain.
#[derive(Debug, Clone)]
pub struct IncomingTransfer {
    pub to: String,
    pub from: String,
    pub amount: Amount,
    pub currency: Currency,
    pub tx_id: String,
    pub block_num: u64,
}

/// Chain-specific operations the engine depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn blockchain(&self) -> Blockchain;

    /// The platform-controlled address deposits consolidate into and
    /// withdrawals pay out from.
    fn main_pool_address(&self) -> String;

    async fn current_block(&self) -> EngineResult<BlockRef>;

    async fn block_hash(&self, number: u64) -> EngineResult<String>;

    /// All transfers landing in one block. Chains without cheap block
    /// scans may return `ChainUnavailable`; the sweeper then relies on
    /// balance scans alone.
    async fn transfers_in_block(&self, number: u64) -> EngineResult<Vec<IncomingTransfer>>;

    async fn native_balance(&self, address: &str) -> EngineResult<Amount>;

    async fn token_balance(&self, address: &str) -> EngineResult<Amount>;

    /// Transfer signed by a custodial wallet. Returns the transaction id.
    async fn transfer_native(
        &self,
        wallet: &Wallet,
        to: &str,
        amount: Amount,
    ) -> EngineResult<String>;

    async fn transfer_token(
        &self,
        wallet: &Wallet,
        to: &str,
        amount: Amount,
    ) -> EngineResult<String>;

    /// Transfer signed by the main pool key.
    async fn pool_transfer_native(&self, to: &str, amount: Amount) -> EngineResult<String>;

    async fn pool_transfer_token(&self, to: &str, amount: Amount) -> EngineResult<String>;

    /// Block until the transaction is confirmed or the timeout elapses.
    /// Fails closed: a timeout is an error, never an assumed success.
    async fn wait_for_confirmation(&self, tx_id: &str, timeout: Duration) -> EngineResult<()>;

    /// Generate a fresh custodial keypair for a user.
    async fn generate_wallet(&self, user_id: UserId) -> EngineResult<Wallet>;
}

/// Durable record of all custodial wallets.
pub struct WalletStore {
    wallets: DashMap<(UserId, Blockchain), Wallet>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
        }
    }

    /// Insert a wallet. Wallets are immutable: a second insert for the same
    /// (user, chain) slot is rejected.
    pub fn insert(&self, wallet: Wallet) -> EngineResult<()> {
        match self.wallets.entry((wallet.user_id, wallet.blockchain)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::AlreadyProcessed(
                format!("wallet for user {} on {}", wallet.user_id, wallet.blockchain),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(wallet);
                Ok(())
            }
        }
    }

    pub fn get(&self, user_id: UserId, blockchain: Blockchain) -> Option<Wallet> {
        self.wallets.get(&(user_id, blockchain)).map(|w| w.clone())
    }

    pub fn all_for_chain(&self, blockchain: Blockchain) -> Vec<Wallet> {
        self.wallets
            .iter()
            .filter(|w| w.blockchain == blockchain)
            .map(|w| w.clone())
            .collect()
    }

    pub fn find_by_address(&self, blockchain: Blockchain, address: &str) -> Option<Wallet> {
        self.wallets
            .iter()
            .find(|w| w.blockchain == blockchain && w.public_key == address)
            .map(|w| w.clone())
    }
}

impl Default for WalletStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Provision custodial wallets on every supported chain for a new user.
pub async fn provision_wallets(
    user_id: UserId,
    chains: &[Arc<dyn ChainClient>],
    store: &WalletStore,
) -> EngineResult<()> {
    for chain in chains {
        let wallet = chain.generate_wallet(user_id).await?;
        store.insert(wallet)?;
    }
    Ok(())
}

/// Cached view of one chain's custodial wallets.
///
/// Sweep loops hit this every cycle; the registry refreshes from the store
/// once per `refresh_every` instead of on every read.
pub struct WalletRegistry {
    store: Arc<WalletStore>,
    blockchain: Blockchain,
    refresh_every: Duration,
    cached: RwLock<(Vec<Wallet>, Option<Instant>)>,
}

impl WalletRegistry {
    pub fn new(store: Arc<WalletStore>, blockchain: Blockchain, refresh_every: Duration) -> Self {
        Self {
            store,
            blockchain,
            refresh_every,
            cached: RwLock::new((Vec::new(), None)),
        }
    }

    pub async fn wallets(&self) -> Vec<Wallet> {
        {
            let cached = self.cached.read().await;
            if let (wallets, Some(at)) = &*cached {
                if at.elapsed() < self.refresh_every {
                    return wallets.clone();
                }
            }
        }

        let fresh = self.store.all_for_chain(self.blockchain);
        let mut cached = self.cached.write().await;
        *cached = (fresh.clone(), Some(Instant::now()));
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(user_id: UserId, chain: Blockchain, key: &str) -> Wallet {
        Wallet {
            user_id,
            blockchain: chain,
            public_key: key.to_string(),
            encrypted_private_key: "enc".to_string(),
        }
    }

    #[test]
    fn wallets_are_write_once() {
        let store = WalletStore::new();
        store.insert(wallet(1, Blockchain::Tron, "T1")).unwrap();
        let err = store.insert(wallet(1, Blockchain::Tron, "T2")).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyProcessed(_)));
        assert_eq!(store.get(1, Blockchain::Tron).unwrap().public_key, "T1");
    }

    #[test]
    fn lookup_by_chain_and_address() {
        let store = WalletStore::new();
        store.insert(wallet(1, Blockchain::Tron, "T1")).unwrap();
        store.insert(wallet(1, Blockchain::Ethereum, "0xE1")).unwrap();
        store.insert(wallet(2, Blockchain::Tron, "T2")).unwrap();

        assert_eq!(store.all_for_chain(Blockchain::Tron).len(), 2);
        assert_eq!(
            store.find_by_address(Blockchain::Tron, "T2").unwrap().user_id,
            2
        );
        assert!(store.find_by_address(Blockchain::Ethereum, "T2").is_none());
    }

    #[tokio::test]
    async fn registry_serves_from_cache_within_refresh_window() {
        let store = Arc::new(WalletStore::new());
        store.insert(wallet(1, Blockchain::Solana, "S1")).unwrap();

        let registry =
            WalletRegistry::new(store.clone(), Blockchain::Solana, Duration::from_secs(60));
        assert_eq!(registry.wallets().await.len(), 1);

        // Added after the first refresh; invisible until the TTL lapses.
        store.insert(wallet(2, Blockchain::Solana, "S2")).unwrap();
        assert_eq!(registry.wallets().await.len(), 1);
    }
}
