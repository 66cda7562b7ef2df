use dashmap::DashMap;
use log::{error, info};
use tokio::sync::{Mutex, RwLock};

use std::sync::Arc;

use crate::config::BlockchainConfig;

use super::account::{AccountSummary, ChainBalance};
use super::block::NonceRecord;
use super::chain::{Blockchain, BlockchainError};
use super::crypto::Address;
use super::pow::{CancelFlag, ProofOfWork, WorkClock};
use super::storage::ChainStore;
use super::transaction::Transaction;

/// A blockchain behind its own reader/writer lock
pub type SharedBlockchain = Arc<RwLock<Blockchain>>;

async fn run_blocking<T, F>(f: F) -> Result<T, BlockchainError>
where
    F: FnOnce() -> Result<T, BlockchainError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BlockchainError::SystemError(e.to_string()))?
}

/// Every chain of one namespace, by name
///
/// Chains never share a lock: mining on one chain does not wait for another.
/// Mutations and proof-of-work run on the blocking thread pool.
pub struct Multichain {
    namespace: String,
    store: Arc<dyn ChainStore>,
    difficulty: usize,
    clock: Arc<dyn WorkClock>,
    chains: DashMap<String, SharedBlockchain>,

    /// Serializes chain creation so a name is only initialized once
    creating: Mutex<()>,

    /// Flag handed to the proof-of-work engine of every chain, replaced on reset
    cancel: RwLock<CancelFlag>,
}

impl Multichain {
    pub fn new(namespace: &str, store: Arc<dyn ChainStore>, difficulty: usize, clock: Arc<dyn WorkClock>) -> Self {
        Multichain {
            namespace: namespace.to_string(),
            store,
            difficulty,
            clock,
            chains: DashMap::new(),
            creating: Mutex::new(()),
            cancel: RwLock::new(CancelFlag::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Address collecting every mining and transfer fee
    pub fn operator_address(&self) -> Address {
        Address::for_operator(&self.namespace)
    }

    /// Checks that `name` may be used for a user chain
    ///
    /// Names are non-empty and ASCII alphanumeric, and neither the operator chain
    /// nor the namespace itself.
    pub fn check_chain_name(&self, name: &str) -> Result<(), BlockchainError> {
        if name.is_empty()
            || !name.chars().all(|c| c.is_ascii_alphanumeric())
            || name == BlockchainConfig::NODE_OPERATOR
            || name == self.namespace
        {
            return Err(BlockchainError::InvalidChainName(name.to_string()));
        }
        Ok(())
    }

    /// Initializes the operator chain, then every chain found in storage
    ///
    /// A stored chain that fails validation is logged and left out. An invalid
    /// operator chain is an error since no fee could be collected.
    ///
    /// # Returns
    ///
    /// The number of chains loaded, operator included
    pub async fn load_all(&self) -> Result<usize, BlockchainError> {
        self.init_chain(BlockchainConfig::NODE_OPERATOR, self.operator_address())
            .await?;

        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        let names = run_blocking(move || Ok(store.list_chain_names(&namespace)?)).await?;

        for name in names {
            if self.chains.contains_key(&name) {
                continue;
            }

            let owner = Address::for_chain(&self.namespace, &name);
            if let Err(err) = self.init_chain(&name, owner).await {
                error!("Skipping chain {}: {}", name, err);
            }
        }

        info!("Loaded {} chains in namespace {}", self.chains.len(), self.namespace);
        Ok(self.chains.len())
    }

    /// Gets a chain, creating it on first use
    pub async fn open(&self, name: &str) -> Result<SharedBlockchain, BlockchainError> {
        self.check_chain_name(name)?;
        if let Ok(chain) = self.get(name) {
            return Ok(chain);
        }

        let _creating = self.creating.lock().await;
        if let Ok(chain) = self.get(name) {
            return Ok(chain);
        }

        self.init_chain(name, Address::for_chain(&self.namespace, name)).await
    }

    /// Gets an already loaded chain
    pub fn get(&self, name: &str) -> Result<SharedBlockchain, BlockchainError> {
        self.chains
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BlockchainError::UnknownChain(name.to_string()))
    }

    /// Names of every loaded chain, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Mines `amount` coins on chain `name`, paying the work fee to the operator
    pub async fn mine(&self, name: &str, amount: f64) -> Result<NonceRecord, BlockchainError> {
        let chain = self.get(name)?;
        let fee_address = self.operator_address();

        let mut blockchain = Arc::clone(&chain).write_owned().await;
        self.ensure_registered(name, &chain)?;
        run_blocking(move || blockchain.mine(amount, &fee_address)).await
    }

    /// Moves `amount` coins on chain `from`, from its owner to the owner of chain `to`
    pub async fn transfer(&self, from: &str, to: &str, amount: f64) -> Result<NonceRecord, BlockchainError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(BlockchainError::InvalidAmount(format!(
                "Transfer amount must be positive, got {}",
                amount
            )));
        }

        let source = self.get(from)?;
        let to_address = self.get(to)?.read().await.get_coin_owner_address()?;
        let cost_address = self.operator_address();

        let mut blockchain = Arc::clone(&source).write_owned().await;
        self.ensure_registered(from, &source)?;
        let nonce = run_blocking(move || {
            let from_address = blockchain.get_coin_owner_address()?;
            let transaction = Transaction::new(amount, from_address, to_address);
            blockchain.create_transactions(vec![transaction], Some(&cost_address))
        })
        .await?;

        info!("Transferred {} coins on chain {} to {}", amount, from, to);
        Ok(nonce)
    }

    /// Balance of every chain owner on chain `name`
    pub async fn accounts(&self, name: &str) -> Result<Vec<AccountSummary>, BlockchainError> {
        let target = self.get(name)?;

        let mut owners = Vec::new();
        for chain_name in self.names() {
            let chain = self.get(&chain_name)?;
            let blockchain = chain.read().await;
            owners.push((blockchain.get_owner_name()?, blockchain.get_coin_owner_address()?));
        }

        let blockchain = target.read().await;
        Ok(owners
            .into_iter()
            .map(|(owner_name, address)| AccountSummary {
                home: format!("{}/{}", owner_name, name),
                coins: blockchain.coins_in_wallet(Some(&address)),
                name: owner_name,
                address,
            })
            .collect())
    }

    /// Coins in circulation on chain `chain` and the share held by the owner of chain `from`
    pub async fn partner(&self, from: &str, chain: &str) -> Result<ChainBalance, BlockchainError> {
        let address = self.get(from)?.read().await.get_coin_owner_address()?;

        let target = self.get(chain)?;
        let blockchain = target.read().await;

        Ok(ChainBalance {
            coins_in_eco: blockchain.coins_in_eco(),
            coins_in_wallet: blockchain.coins_in_wallet(Some(&address)),
        })
    }

    /// Wipes every chain of the namespace and starts over from fresh genesis blocks
    ///
    /// Running proof-of-work searches are cancelled; other operations in flight
    /// finish before the wipe.
    pub async fn reset(&self) -> Result<usize, BlockchainError> {
        {
            let mut cancel = self.cancel.write().await;
            cancel.cancel();
            *cancel = CancelFlag::new();
        }

        let _creating = self.creating.lock().await;

        let mut guards = Vec::new();
        for name in self.names() {
            let chain = self.get(&name)?;
            guards.push(chain.write_owned().await);
        }

        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        run_blocking(move || Ok(store.delete_all(&namespace)?)).await?;

        self.chains.clear();
        drop(guards);

        info!("Reset namespace {}", self.namespace);
        self.load_all().await
    }

    /// Fails when `chain` is no longer the instance registered under `name`,
    /// which happens to operations that waited on a chain while it was reset
    fn ensure_registered(&self, name: &str, chain: &SharedBlockchain) -> Result<(), BlockchainError> {
        match self.chains.get(name) {
            Some(entry) if Arc::ptr_eq(entry.value(), chain) => Ok(()),
            _ => Err(BlockchainError::UnknownChain(name.to_string())),
        }
    }

    async fn init_chain(&self, name: &str, owner: Address) -> Result<SharedBlockchain, BlockchainError> {
        let cancel = self.cancel.read().await.clone();
        let pow = ProofOfWork::new(self.difficulty, Arc::clone(&self.clock)).with_cancel(cancel);
        let blockchain = Blockchain::new(name, owner, &self.namespace, Arc::clone(&self.store), pow);

        let blockchain = run_blocking(move || {
            let mut blockchain = blockchain;
            blockchain.init()?;
            Ok(blockchain)
        })
        .await?;

        if !blockchain.is_valid() {
            return Err(BlockchainError::InvalidChain(name.to_string()));
        }

        let shared = Arc::new(RwLock::new(blockchain));
        self.chains.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }
}
