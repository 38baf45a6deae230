//! In-process chain simulator.
//!
//! Implements [`ChainClient`] against an in-memory block list and balance
//! table. The demo binary and the integration tests drive deposits, sweeps
//! and withdrawals through it without any RPC endpoint. Block hashes come
//! from hashing (chain, height, entropy), and tests can pin a hash to force
//! a game result.

use crate::chain::{BlockRef, ChainClient, IncomingTransfer, Wallet};
use crate::errors::{EngineError, EngineResult};
use crate::money::{Amount, Blockchain, Currency, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

struct SimBlock {
    number: u64,
    hash: String,
    transfers: Vec<IncomingTransfer>,
}

pub struct SimulatedChain {
    blockchain: Blockchain,
    main_pool: String,
    blocks: Mutex<Vec<SimBlock>>,
    queued: Mutex<Vec<IncomingTransfer>>,
    balances: DashMap<(String, Currency), Amount>,
    confirmed: DashMap<String, ()>,
    offline: AtomicBool,
}

impl SimulatedChain {
    pub fn new(blockchain: Blockchain, main_pool: &str) -> Self {
        let genesis = SimBlock {
            number: 0,
            hash: Self::derive_hash(blockchain, 0, 0),
            transfers: Vec::new(),
        };
        Self {
            blockchain,
            main_pool: main_pool.to_string(),
            blocks: Mutex::new(vec![genesis]),
            queued: Mutex::new(Vec::new()),
            balances: DashMap::new(),
            confirmed: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    fn derive_hash(blockchain: Blockchain, number: u64, entropy: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(blockchain.to_string().as_bytes());
        hasher.update(number.to_le_bytes());
        hasher.update(entropy.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Simulate the chain producing a block; queued transfers land in it.
    pub fn advance_block(&self) -> BlockRef {
        let entropy = rand::thread_rng().gen::<u64>();
        self.advance_block_inner(None, entropy)
    }

    /// Produce a block with a pinned hash. Test hook for forcing outcomes.
    pub fn advance_block_with_hash(&self, hash: &str) -> BlockRef {
        self.advance_block_inner(Some(hash.to_string()), 0)
    }

    fn advance_block_inner(&self, hash: Option<String>, entropy: u64) -> BlockRef {
        let mut blocks = self.blocks.lock().expect("block list poisoned");
        let number = blocks.last().map(|b| b.number + 1).unwrap_or(0);
        let hash = hash.unwrap_or_else(|| Self::derive_hash(self.blockchain, number, entropy));
        let mut transfers: Vec<IncomingTransfer> =
            std::mem::take(&mut *self.queued.lock().expect("transfer queue poisoned"));
        for t in &mut transfers {
            t.block_num = number;
        }
        blocks.push(SimBlock {
            number,
            hash: hash.clone(),
            transfers,
        });
        BlockRef { number, hash }
    }

    /// Faucet: credit an on-chain balance without a transfer record.
    pub fn fund(&self, address: &str, currency: Currency, amount: Amount) {
        let mut balance = self
            .balances
            .entry((address.to_string(), currency))
            .or_insert(Amount::ZERO);
        *balance = *balance + amount;
    }

    /// Simulate an external deposit: credits the balance and queues the
    /// transfer for the next block. Returns the transaction id.
    pub fn deposit(
        &self,
        from: &str,
        to: &str,
        currency: Currency,
        amount: Amount,
    ) -> String {
        let tx_id = Uuid::new_v4().to_string();
        self.fund(to, currency, amount);
        self.queued
            .lock()
            .expect("transfer queue poisoned")
            .push(IncomingTransfer {
                to: to.to_string(),
                from: from.to_string(),
                amount,
                currency,
                tx_id: tx_id.clone(),
                block_num: 0,
            });
        self.confirmed.insert(tx_id.clone(), ());
        tx_id
    }

    pub fn on_chain_balance(&self, address: &str, currency: Currency) -> Amount {
        self.balances
            .get(&(address.to_string(), currency))
            .map(|b| *b)
            .unwrap_or(Amount::ZERO)
    }

    /// Drop the chain off the network; every call fails until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> EngineResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(EngineError::ChainUnavailable(format!(
                "{} rpc offline",
                self.blockchain
            )))
        } else {
            Ok(())
        }
    }

    fn move_funds(
        &self,
        from: &str,
        to: &str,
        currency: Currency,
        amount: Amount,
    ) -> EngineResult<String> {
        self.check_online()?;
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(amount));
        }
        {
            let mut balance = self
                .balances
                .entry((from.to_string(), currency))
                .or_insert(Amount::ZERO);
            if *balance < amount {
                return Err(EngineError::ChainTransferFailed(format!(
                    "{} has {} {}, tried to send {}",
                    from, *balance, currency, amount
                )));
            }
            *balance = *balance - amount;
        }
        self.fund(to, currency, amount);
        let tx_id = Uuid::new_v4().to_string();
        self.confirmed.insert(tx_id.clone(), ());
        Ok(tx_id)
    }

    fn address_prefix(&self) -> &'static str {
        match self.blockchain {
            Blockchain::Tron => "T",
            Blockchain::Ethereum => "0x",
            Blockchain::Bnb => "bnb",
            Blockchain::Solana => "So",
        }
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    fn main_pool_address(&self) -> String {
        self.main_pool.clone()
    }

    async fn current_block(&self) -> EngineResult<BlockRef> {
        self.check_online()?;
        let blocks = self.blocks.lock().expect("block list poisoned");
        let last = blocks.last().expect("genesis always present");
        Ok(BlockRef {
            number: last.number,
            hash: last.hash.clone(),
        })
    }

    async fn block_hash(&self, number: u64) -> EngineResult<String> {
        self.check_online()?;
        let blocks = self.blocks.lock().expect("block list poisoned");
        blocks
            .iter()
            .find(|b| b.number == number)
            .map(|b| b.hash.clone())
            .ok_or_else(|| EngineError::ChainUnavailable(format!("block {} not found", number)))
    }

    async fn transfers_in_block(&self, number: u64) -> EngineResult<Vec<IncomingTransfer>> {
        self.check_online()?;
        let blocks = self.blocks.lock().expect("block list poisoned");
        blocks
            .iter()
            .find(|b| b.number == number)
            .map(|b| b.transfers.clone())
            .ok_or_else(|| EngineError::ChainUnavailable(format!("block {} not found", number)))
    }

    async fn native_balance(&self, address: &str) -> EngineResult<Amount> {
        self.check_online()?;
        Ok(self.on_chain_balance(address, self.blockchain.native_currency()))
    }

    async fn token_balance(&self, address: &str) -> EngineResult<Amount> {
        self.check_online()?;
        Ok(self.on_chain_balance(address, Currency::Usdt))
    }

    async fn transfer_native(
        &self,
        wallet: &Wallet,
        to: &str,
        amount: Amount,
    ) -> EngineResult<String> {
        self.move_funds(
            &wallet.public_key,
            to,
            self.blockchain.native_currency(),
            amount,
        )
    }

    async fn transfer_token(
        &self,
        wallet: &Wallet,
        to: &str,
        amount: Amount,
    ) -> EngineResult<String> {
        self.move_funds(&wallet.public_key, to, Currency::Usdt, amount)
    }

    async fn pool_transfer_native(&self, to: &str, amount: Amount) -> EngineResult<String> {
        let pool = self.main_pool.clone();
        self.move_funds(&pool, to, self.blockchain.native_currency(), amount)
    }

    async fn pool_transfer_token(&self, to: &str, amount: Amount) -> EngineResult<String> {
        let pool = self.main_pool.clone();
        self.move_funds(&pool, to, Currency::Usdt, amount)
    }

    async fn wait_for_confirmation(&self, tx_id: &str, timeout: Duration) -> EngineResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check_online()?;
            if self.confirmed.contains_key(tx_id) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::ChainTransferFailed(format!(
                    "tx {} not confirmed within {:?}",
                    tx_id, timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn generate_wallet(&self, user_id: UserId) -> EngineResult<Wallet> {
        let mut rng = rand::thread_rng();
        let body: [u8; 16] = rng.gen();
        let secret: [u8; 32] = rng.gen();
        Ok(Wallet {
            user_id,
            blockchain: self.blockchain,
            public_key: format!("{}{}", self.address_prefix(), hex::encode(body)),
            encrypted_private_key: hex::encode(secret),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deposits_land_in_the_next_block() {
        let chain = SimulatedChain::new(Blockchain::Tron, "Tpool");
        let tx = chain.deposit("Text", "Tuser", Currency::Trx, Amount::from_units(50));
        let block = chain.advance_block();

        let transfers = chain.transfers_in_block(block.number).await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].tx_id, tx);
        assert_eq!(transfers[0].block_num, block.number);
        assert_eq!(
            chain.native_balance("Tuser").await.unwrap(),
            Amount::from_units(50)
        );
    }

    #[tokio::test]
    async fn transfers_respect_on_chain_balances() {
        let chain = SimulatedChain::new(Blockchain::Tron, "Tpool");
        let wallet = chain.generate_wallet(1).await.unwrap();
        chain.fund(&wallet.public_key, Currency::Trx, Amount::from_units(10));

        let err = chain
            .transfer_native(&wallet, "Tpool", Amount::from_units(11))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ChainTransferFailed(_)));

        let tx = chain
            .transfer_native(&wallet, "Tpool", Amount::from_units(10))
            .await
            .unwrap();
        chain
            .wait_for_confirmation(&tx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(chain.on_chain_balance("Tpool", Currency::Trx), Amount::from_units(10));
    }

    #[tokio::test]
    async fn offline_chain_fails_closed() {
        let chain = SimulatedChain::new(Blockchain::Solana, "Spool");
        chain.set_offline(true);
        assert!(chain.current_block().await.is_err());
        chain.set_offline(false);
        assert!(chain.current_block().await.is_ok());
    }

    #[tokio::test]
    async fn pinned_hashes_are_served_back() {
        let chain = SimulatedChain::new(Blockchain::Tron, "Tpool");
        let block = chain.advance_block_with_hash("0000000000000a7");
        assert_eq!(chain.block_hash(block.number).await.unwrap(), "0000000000000a7");
    }
}
