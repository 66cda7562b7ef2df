use std::sync::Arc;
use thiserror::Error;
use log::{error, info, warn};

use crate::config::BlockchainConfig;

use super::account;
use super::block::{Block, BlockData, GenesisData, NonceRecord};
use super::crypto::{Address, HashError};
use super::pow::{PowError, ProofOfWork};
use super::storage::{ChainStore, StorageError};
use super::transaction::Transaction;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Hash error: {0}")]
    HashError(#[from] HashError),

    #[error("Proof of work error: {0}")]
    ProofOfWorkError(#[from] PowError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Invalid chain name: {0}")]
    InvalidChainName(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Chain {0} is not initialized")]
    NotInitialized(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Fee charged for `cpu` microseconds of work spent moving `amount` coins
pub fn cpu_cost(cpu: u64, amount: f64) -> f64 {
    (cpu as f64 / BlockchainConfig::CPU_COST_FACTOR) * amount
}

fn check_amount(amount: f64) -> Result<(), BlockchainError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(BlockchainError::InvalidAmount(format!(
            "Amount must be a finite, non-negative number, got {}",
            amount
        )));
    }
    Ok(())
}

/// One named coin: an append-only chain of blocks mirrored to a chain store
///
/// Every mutation rewrites the full stored chain. A block is only kept in memory
/// once the store has accepted the new chain.
pub struct Blockchain {
    /// Name of the coin, also the storage key
    name: String,

    /// Address receiving every coin minted on this chain
    owner_address: Address,

    /// Namespace the chain belongs to
    namespace: String,

    /// The chain of blocks
    chain: Vec<Block>,

    /// Storage for blockchain data
    store: Arc<dyn ChainStore>,

    /// Proof of work engine (difficulty and clock)
    pow: ProofOfWork,

    /// Result of the validation run by `init`
    valid: bool,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("owner_address", &self.owner_address)
            .field("blocks", &self.chain.len())
            .field("valid", &self.valid)
            .finish()
    }
}

impl Blockchain {
    /// Creates an empty, uninitialized blockchain
    ///
    /// # Arguments
    ///
    /// * `name` - The coin name
    /// * `owner_address` - Owner used if the chain has to be created
    /// * `namespace` - The namespace the chain lives in
    /// * `store` - Where the chain is persisted
    /// * `pow` - Proof of work engine used by `mine`
    ///
    /// `init` must run before any other operation.
    pub fn new(
        name: &str,
        owner_address: Address,
        namespace: &str,
        store: Arc<dyn ChainStore>,
        pow: ProofOfWork,
    ) -> Self {
        Blockchain {
            name: name.to_string(),
            owner_address,
            namespace: namespace.to_string(),
            chain: Vec::new(),
            store,
            pow,
            valid: false,
        }
    }

    /// Loads the chain from storage, or creates and stores its genesis block
    ///
    /// # Returns
    ///
    /// Whether the resulting chain is valid
    pub fn init(&mut self) -> Result<bool, BlockchainError> {
        match self.store.load_chain(&self.namespace, &self.name)? {
            None => {
                let genesis = GenesisData {
                    name: self.name.clone(),
                    namespace: self.namespace.clone(),
                    version: BlockchainConfig::VERSION.to_string(),
                    address: self.owner_address.clone(),
                    cpu_factor: BlockchainConfig::CPU_COST_FACTOR,
                };

                self.chain.clear();
                self.append_block(NonceRecord::ZERO, Vec::new(), Some(genesis.into_data()?))?;
                info!("Created genesis block for chain {} (owner {})", self.name, self.owner_address);
            }
            Some(blocks) => {
                // The stored genesis block is authoritative for the chain identity
                match blocks.first().and_then(Block::genesis_data) {
                    Some(genesis) => {
                        self.name = genesis.name;
                        self.owner_address = genesis.address;
                        self.namespace = genesis.namespace;
                    }
                    None => warn!("Chain {} has no genesis metadata", self.name),
                }

                self.chain = blocks;
                info!("Loaded chain {} from storage ({} blocks)", self.name, self.chain.len());
            }
        }

        self.valid = self.validate();
        if !self.valid {
            warn!("Chain {} failed validation", self.name);
        }

        Ok(self.valid)
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if every block links to its predecessor and every block hash
    /// recomputes from the block's own fields, false otherwise
    pub fn validate(&self) -> bool {
        let Some(genesis) = self.chain.first() else {
            return false;
        };

        if genesis.genesis_data().is_none() {
            return false;
        }

        let linked = self
            .chain
            .windows(2)
            .all(|pair| pair[1].previous_block_hash == pair[0].hash);

        linked && self.chain.iter().all(Block::validate)
    }

    /// Appends a block on top of the current tail and persists the whole chain
    ///
    /// # Arguments
    ///
    /// * `nonce` - The proof-of-work record of the block
    /// * `transactions` - The transactions to include in the block
    /// * `data` - Optional block metadata
    ///
    /// # Returns
    ///
    /// The new block, once the store has accepted it
    pub fn append_block(
        &mut self,
        nonce: NonceRecord,
        transactions: Vec<Transaction>,
        data: Option<BlockData>,
    ) -> Result<Block, BlockchainError> {
        let block = Block::new(self.chain.last(), transactions, nonce, data.unwrap_or_default())?;
        self.commit(vec![block.clone()])?;

        Ok(block)
    }

    /// Pushes `blocks` and persists the chain with a single save
    ///
    /// On a failed save every pushed block is dropped again, so memory and store
    /// both keep the previous chain.
    fn commit(&mut self, blocks: Vec<Block>) -> Result<(), BlockchainError> {
        let len = self.chain.len();
        self.chain.extend(blocks);

        if let Err(err) = self.store.save_chain(&self.namespace, &self.name, &self.chain) {
            error!(
                "Failed to persist blocks {}..={} of chain {}: {}",
                len + 1,
                self.chain.len(),
                self.name,
                err
            );
            self.chain.truncate(len);
            return Err(err.into());
        }

        Ok(())
    }

    /// Mines `amount` new coins for the chain owner
    ///
    /// Builds the reward block carrying the proof-of-work nonce and a cost free
    /// block paying the work fee from the owner to `fee_address`. Both blocks are
    /// stored together or not at all.
    ///
    /// # Returns
    ///
    /// The nonce record of the reward block
    pub fn mine(&mut self, amount: f64, fee_address: &Address) -> Result<NonceRecord, BlockchainError> {
        check_amount(amount)?;
        let owner = self.get_coin_owner_address()?;

        let tail = self.get_last_block()?;
        let nonce = self.pow.prove(tail)?;
        debug_assert!(self.pow.verify(tail, &nonce));

        let mint = vec![Transaction::new_mint(amount, owner.clone())];
        let reward = Block::new(Some(tail), mint, nonce, BlockData::new())?;

        let fee = vec![Transaction::new(cpu_cost(nonce.cpu, amount), owner, fee_address.clone())];
        let fee_block = Block::new(Some(&reward), fee, NonceRecord::ZERO, BlockData::new())?;

        self.commit(vec![reward, fee_block])?;

        info!(
            "Mined {} coins on chain {} (nonce {}, cpu {} us)",
            amount, self.name, nonce.nonce, nonce.cpu
        );
        Ok(nonce)
    }

    /// Appends a cost free block carrying `transactions`
    ///
    /// With a `cpu_cost_address`, the measured cost of building the block is
    /// charged in a second block: every recipient pays the same share of the total
    /// fee, whatever amount it received. Both blocks are stored with one save.
    ///
    /// # Returns
    ///
    /// The nonce record of the first block, with the measured cost in `cpu`
    pub fn create_transactions(
        &mut self,
        transactions: Vec<Transaction>,
        cpu_cost_address: Option<&Address>,
    ) -> Result<NonceRecord, BlockchainError> {
        for transaction in &transactions {
            check_amount(transaction.amount)?;
        }
        let tail = self.get_last_block()?;

        let clock = self.pow.clock();
        let start = clock.now_micros();
        let block = Block::new(Some(tail), transactions.clone(), NonceRecord::ZERO, BlockData::new())?;
        let cpu = clock.now_micros().saturating_sub(start);

        let mut blocks = Vec::with_capacity(2);
        match cpu_cost_address {
            Some(cost_address) if !transactions.is_empty() => {
                let total: f64 = transactions.iter().map(|t| t.amount).sum();
                let share = cpu_cost(cpu, total) / transactions.len() as f64;

                let fees = transactions
                    .iter()
                    .map(|t| Transaction::new(share, t.to.clone(), cost_address.clone()))
                    .collect();
                let fee_block = Block::new(Some(&block), fees, NonceRecord::ZERO, BlockData::new())?;
                blocks.push(block);
                blocks.push(fee_block);
            }
            _ => blocks.push(block),
        }

        self.commit(blocks)?;
        Ok(NonceRecord::new(0, cpu))
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> Result<&Block, BlockchainError> {
        self.chain
            .last()
            .ok_or_else(|| BlockchainError::NotInitialized(self.name.clone()))
    }

    fn genesis(&self) -> Result<GenesisData, BlockchainError> {
        let first = self
            .chain
            .first()
            .ok_or_else(|| BlockchainError::NotInitialized(self.name.clone()))?;

        first
            .genesis_data()
            .ok_or_else(|| BlockchainError::InvalidChain(format!("{} has no genesis metadata", self.name)))
    }

    /// Owner address recorded in the genesis block
    pub fn get_coin_owner_address(&self) -> Result<Address, BlockchainError> {
        Ok(self.genesis()?.address)
    }

    /// Chain name recorded in the genesis block
    pub fn get_owner_name(&self) -> Result<String, BlockchainError> {
        Ok(self.genesis()?.name)
    }

    /// Total amount ever minted on this chain
    pub fn coins_in_eco(&self) -> f64 {
        account::coins_in_eco(&self.chain)
    }

    /// Net balance of `address`, or of the chain owner when `None`
    pub fn coins_in_wallet(&self, address: Option<&Address>) -> f64 {
        account::coins_in_wallet(&self.chain, address.unwrap_or(&self.owner_address))
    }

    /// Gets the entire blockchain
    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn owner_address(&self) -> &Address {
        &self.owner_address
    }

    /// Validity recorded by the last `init`
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::pow::{CancelFlag, StepClock, SystemClock, WorkClock};
    use crate::blockchain::storage::MemoryChainStore;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn blockchain_with(
        name: &str,
        owner: &str,
        store: Arc<dyn ChainStore>,
        difficulty: usize,
        clock: Arc<dyn WorkClock>,
    ) -> Blockchain {
        let pow = ProofOfWork::new(difficulty, clock);
        Blockchain::new(name, Address::from(owner), "ns", store, pow)
    }

    fn initialized(difficulty: usize, clock: Arc<dyn WorkClock>) -> Blockchain {
        let mut blockchain = blockchain_with("alice", "addr1", Arc::new(MemoryChainStore::new()), difficulty, clock);
        assert!(blockchain.init().unwrap());
        blockchain
    }

    /// Store accepting a limited number of saves, failing every one after that
    struct FlakyStore {
        inner: MemoryChainStore,
        saves_left: AtomicUsize,
    }

    impl FlakyStore {
        fn new(saves_left: usize) -> Self {
            FlakyStore {
                inner: MemoryChainStore::new(),
                saves_left: AtomicUsize::new(saves_left),
            }
        }

        fn allow(&self, saves: usize) {
            self.saves_left.store(saves, Ordering::SeqCst);
        }
    }

    impl ChainStore for FlakyStore {
        fn load_chain(&self, namespace: &str, name: &str) -> Result<Option<Vec<Block>>, StorageError> {
            self.inner.load_chain(namespace, name)
        }

        fn save_chain(&self, namespace: &str, name: &str, blocks: &[Block]) -> Result<(), StorageError> {
            let allowed = self
                .saves_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
            if allowed.is_err() {
                return Err(StorageError::SerializationError("disk full".to_string()));
            }
            self.inner.save_chain(namespace, name, blocks)
        }

        fn list_chain_names(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list_chain_names(namespace)
        }

        fn delete_all(&self, namespace: &str) -> Result<(), StorageError> {
            self.inner.delete_all(namespace)
        }
    }

    #[test]
    fn test_genesis_block() {
        let blockchain = initialized(1, Arc::new(SystemClock::new()));
        let chain = blockchain.blocks();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 1);
        assert_eq!(chain[0].previous_block_hash, "0");
        assert!(chain[0].transactions.is_empty());
        assert_eq!(chain[0].nonce, NonceRecord::ZERO);

        let genesis = chain[0].genesis_data().unwrap();
        assert_eq!(genesis.name, "alice");
        assert_eq!(genesis.address, Address::from("addr1"));
        assert_eq!(genesis.namespace, "ns");
        assert_eq!(genesis.version, BlockchainConfig::VERSION);
        assert_eq!(genesis.cpu_factor, BlockchainConfig::CPU_COST_FACTOR);

        assert!(blockchain.validate());
        assert!(blockchain.is_valid());
        assert_eq!(blockchain.get_owner_name().unwrap(), "alice");
        assert_eq!(blockchain.get_coin_owner_address().unwrap(), Address::from("addr1"));
    }

    #[test]
    fn test_operations_require_init() {
        let mut blockchain = blockchain_with("alice", "addr1", Arc::new(MemoryChainStore::new()), 1, Arc::new(SystemClock::new()));

        assert!(!blockchain.validate());
        assert!(matches!(blockchain.get_last_block(), Err(BlockchainError::NotInitialized(_))));
        assert!(matches!(
            blockchain.mine(10.0, &Address::from("fees")),
            Err(BlockchainError::NotInitialized(_))
        ));
        assert!(matches!(
            blockchain.create_transactions(Vec::new(), None),
            Err(BlockchainError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_mine() {
        let mut blockchain = initialized(4, Arc::new(SystemClock::new()));
        let owner = blockchain.get_coin_owner_address().unwrap();
        let fee_address = Address::from("feeAddr");
        let genesis = blockchain.get_last_block().unwrap().clone();

        let nonce = blockchain.mine(10.0, &fee_address).unwrap();

        let chain = blockchain.blocks();
        assert_eq!(chain.len(), 3);

        // The nonce solves the puzzle posed by the tail at mining time
        let hash = genesis.hash_block(Some(&NonceRecord::new(nonce.nonce, 0))).unwrap();
        assert_eq!(&hash[..4], "0000");

        assert_eq!(chain[1].nonce, nonce);
        assert_eq!(chain[1].transactions, vec![Transaction::new_mint(10.0, owner.clone())]);
        assert_eq!(chain[2].nonce, NonceRecord::ZERO);

        let cost = cpu_cost(nonce.cpu, 10.0);
        assert_eq!(chain[2].transactions, vec![Transaction::new(cost, owner.clone(), fee_address.clone())]);

        assert_eq!(blockchain.coins_in_eco(), 10.0);
        assert_eq!(blockchain.coins_in_wallet(Some(&owner)), 10.0 - cost);
        assert_eq!(blockchain.coins_in_wallet(Some(&fee_address)), cost);
        assert!(blockchain.validate());
    }

    #[test]
    fn test_mine_fee_follows_measured_work() {
        let mut blockchain = initialized(1, Arc::new(StepClock::new(2_000_000)));
        let owner = blockchain.get_coin_owner_address().unwrap();

        let nonce = blockchain.mine(10.0, &Address::from("feeAddr")).unwrap();

        assert_eq!(nonce.cpu, 2_000_000);
        // 2_000_000 / 100_000_000 * 10
        assert!((blockchain.coins_in_wallet(Some(&Address::from("feeAddr"))) - 0.2).abs() < 1e-12);
        assert!((blockchain.coins_in_wallet(Some(&owner)) - 9.8).abs() < 1e-12);
    }

    #[test]
    fn test_mine_rejects_invalid_amount() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));

        assert!(matches!(
            blockchain.mine(f64::NAN, &Address::from("fees")),
            Err(BlockchainError::InvalidAmount(_))
        ));
        assert!(matches!(
            blockchain.mine(-1.0, &Address::from("fees")),
            Err(BlockchainError::InvalidAmount(_))
        ));
        assert_eq!(blockchain.blocks().len(), 1);
    }

    #[test]
    fn test_cancelled_mining_leaves_chain_untouched() {
        let cancel = CancelFlag::new();
        let pow = ProofOfWork::new(64, Arc::new(SystemClock::new())).with_cancel(cancel.clone());
        let mut blockchain = Blockchain::new("alice", Address::from("addr1"), "ns", Arc::new(MemoryChainStore::new()), pow);
        blockchain.init().unwrap();
        cancel.cancel();

        let result = blockchain.mine(10.0, &Address::from("fees"));

        assert!(matches!(
            result,
            Err(BlockchainError::ProofOfWorkError(PowError::Cancelled { .. }))
        ));
        assert_eq!(blockchain.blocks().len(), 1);
    }

    #[test]
    fn test_create_transactions_without_fee() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));
        let owner = blockchain.get_coin_owner_address().unwrap();
        let bob = Address::from("bob");

        blockchain
            .create_transactions(vec![Transaction::new_mint(10.0, owner.clone())], None)
            .unwrap();
        let nonce = blockchain
            .create_transactions(vec![Transaction::new(4.0, owner.clone(), bob.clone())], None)
            .unwrap();

        assert_eq!(nonce.nonce, 0);
        assert_eq!(blockchain.blocks().len(), 3);
        assert_eq!(blockchain.coins_in_wallet(None), 6.0);
        assert_eq!(blockchain.coins_in_wallet(Some(&bob)), 4.0);
        assert!(blockchain.validate());
    }

    #[test]
    fn test_create_transactions_splits_fee_evenly() {
        let mut blockchain = initialized(1, Arc::new(StepClock::new(1_000_000)));
        let owner = blockchain.get_coin_owner_address().unwrap();
        let bob = Address::from("bob");
        let carol = Address::from("carol");
        let operator = Address::from("operator");

        blockchain
            .create_transactions(vec![Transaction::new_mint(100.0, owner.clone())], None)
            .unwrap();

        let nonce = blockchain
            .create_transactions(
                vec![
                    Transaction::new(10.0, owner.clone(), bob.clone()),
                    Transaction::new(30.0, owner.clone(), carol.clone()),
                ],
                Some(&operator),
            )
            .unwrap();

        assert_eq!(nonce, NonceRecord::new(0, 1_000_000));

        let chain = blockchain.blocks();
        assert_eq!(chain.len(), 4);

        // 1_000_000 / 100_000_000 * 40, split over two recipients
        let share = cpu_cost(1_000_000, 40.0) / 2.0;
        assert_eq!(
            chain[3].transactions,
            vec![
                Transaction::new(share, bob.clone(), operator.clone()),
                Transaction::new(share, carol.clone(), operator.clone()),
            ]
        );

        assert!((blockchain.coins_in_wallet(Some(&operator)) - 0.4).abs() < 1e-12);
        assert!((blockchain.coins_in_wallet(Some(&bob)) - 9.8).abs() < 1e-12);
        assert!((blockchain.coins_in_wallet(Some(&carol)) - 29.8).abs() < 1e-12);
        assert!(blockchain.validate());
    }

    #[test]
    fn test_empty_transaction_list_skips_fee_round() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));

        blockchain
            .create_transactions(Vec::new(), Some(&Address::from("operator")))
            .unwrap();

        assert_eq!(blockchain.blocks().len(), 2);
        assert!(blockchain.validate());
    }

    #[test]
    fn test_value_is_conserved_without_fees() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));
        let owner = blockchain.get_coin_owner_address().unwrap();
        let bob = Address::from("bob");
        let carol = Address::from("carol");

        blockchain
            .create_transactions(vec![Transaction::new_mint(25.0, owner.clone())], None)
            .unwrap();
        blockchain
            .create_transactions(vec![Transaction::new_mint(5.0, bob.clone())], None)
            .unwrap();
        blockchain
            .create_transactions(
                vec![
                    Transaction::new(7.0, owner.clone(), carol.clone()),
                    Transaction::new(2.0, bob.clone(), carol.clone()),
                ],
                None,
            )
            .unwrap();

        let total: f64 = [&owner, &bob, &carol]
            .iter()
            .map(|address| blockchain.coins_in_wallet(Some(address)))
            .sum();

        assert_eq!(blockchain.coins_in_eco(), 30.0);
        assert_eq!(total, blockchain.coins_in_eco());
    }

    #[test]
    fn test_coins_in_wallet_defaults_to_owner() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));
        blockchain.mine(10.0, &Address::from("fees")).unwrap();

        let owner = blockchain.get_coin_owner_address().unwrap();
        assert_eq!(blockchain.coins_in_wallet(None), blockchain.coins_in_wallet(Some(&owner)));
    }

    #[test]
    fn test_tampered_block_is_detected() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));
        blockchain.mine(10.0, &Address::from("fees")).unwrap();
        assert!(blockchain.validate());

        blockchain.chain[1].transactions[0].amount = 1_000.0;
        assert!(!blockchain.validate());
    }

    #[test]
    fn test_rehashed_tampered_block_breaks_link() {
        let mut blockchain = initialized(1, Arc::new(SystemClock::new()));
        blockchain.mine(10.0, &Address::from("fees")).unwrap();

        blockchain.chain[1].transactions[0].amount = 1_000.0;
        blockchain.chain[1].hash = blockchain.chain[1].hash_block(None).unwrap();

        assert!(blockchain.chain[1].validate());
        assert!(!blockchain.validate());
    }

    #[test]
    fn test_reload_round_trip() {
        let store: Arc<dyn ChainStore> = Arc::new(MemoryChainStore::new());
        let mut original = blockchain_with("alice", "addr1", Arc::clone(&store), 1, Arc::new(SystemClock::new()));
        original.init().unwrap();
        original.mine(10.0, &Address::from("fees")).unwrap();
        original
            .create_transactions(
                vec![Transaction::new(3.0, Address::from("addr1"), Address::from("bob"))],
                Some(&Address::from("fees")),
            )
            .unwrap();

        // Construction arguments are ignored once the chain exists
        let mut reloaded = blockchain_with("alice", "someone else", Arc::clone(&store), 1, Arc::new(SystemClock::new()));
        assert!(reloaded.init().unwrap());

        assert_eq!(reloaded.owner_address(), &Address::from("addr1"));
        assert_eq!(reloaded.name(), "alice");
        assert_eq!(reloaded.namespace(), "ns");
        assert_eq!(reloaded.blocks().len(), original.blocks().len());
        for (loaded, block) in reloaded.blocks().iter().zip(original.blocks()) {
            assert_eq!(loaded.hash, block.hash);
        }
        assert_eq!(reloaded.coins_in_wallet(None), original.coins_in_wallet(None));
    }

    #[test]
    fn test_reload_reports_tampered_storage() {
        let store: Arc<dyn ChainStore> = Arc::new(MemoryChainStore::new());
        let mut original = blockchain_with("alice", "addr1", Arc::clone(&store), 1, Arc::new(SystemClock::new()));
        original.init().unwrap();
        original.mine(10.0, &Address::from("fees")).unwrap();

        let mut blocks = store.load_chain("ns", "alice").unwrap().unwrap();
        blocks[1].transactions[0].amount = 99.0;
        store.save_chain("ns", "alice", &blocks).unwrap();

        let mut reloaded = blockchain_with("alice", "addr1", store, 1, Arc::new(SystemClock::new()));
        assert!(!reloaded.init().unwrap());
        assert!(!reloaded.is_valid());
    }

    #[test]
    fn test_failed_save_rolls_back_block() {
        let store = Arc::new(FlakyStore::new(1));
        let mut blockchain = blockchain_with("alice", "addr1", store.clone(), 1, Arc::new(SystemClock::new()));
        blockchain.init().unwrap();

        let result = blockchain.append_block(NonceRecord::ZERO, vec![Transaction::new_mint(1.0, Address::from("addr1"))], None);

        assert!(matches!(result, Err(BlockchainError::StorageError(_))));
        assert_eq!(blockchain.blocks().len(), 1);
        assert_eq!(store.load_chain("ns", "alice").unwrap().unwrap().len(), 1);

        store.allow(1);
        let block = blockchain.append_block(NonceRecord::ZERO, Vec::new(), None).unwrap();
        assert_eq!(block.index, 2);
        assert!(blockchain.validate());
    }

    #[test]
    fn test_failed_save_keeps_mining_unrecorded() {
        // Genesis is the only save that goes through
        let store = Arc::new(FlakyStore::new(1));
        let mut blockchain = blockchain_with("alice", "addr1", store.clone(), 1, Arc::new(SystemClock::new()));
        blockchain.init().unwrap();
        let fees = Address::from("fees");

        let result = blockchain.mine(10.0, &fees);

        assert!(matches!(result, Err(BlockchainError::StorageError(_))));
        assert_eq!(blockchain.blocks().len(), 1);
        assert_eq!(store.load_chain("ns", "alice").unwrap().unwrap().len(), 1);
        assert_eq!(blockchain.coins_in_eco(), 0.0);

        // A retry mints once and pays exactly one fee
        store.allow(1);
        let nonce = blockchain.mine(10.0, &fees).unwrap();

        let stored = store.load_chain("ns", "alice").unwrap().unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored, blockchain.blocks());
        assert_eq!(blockchain.coins_in_eco(), 10.0);
        assert_eq!(blockchain.coins_in_wallet(Some(&fees)), cpu_cost(nonce.cpu, 10.0));
        assert!(blockchain.validate());
    }

    #[test]
    fn test_failed_save_keeps_transfer_unrecorded() {
        let store = Arc::new(FlakyStore::new(2));
        let mut blockchain = blockchain_with("alice", "addr1", store.clone(), 1, Arc::new(StepClock::new(1_000_000)));
        blockchain.init().unwrap();
        let owner = blockchain.get_coin_owner_address().unwrap();
        let bob = Address::from("bob");
        let operator = Address::from("operator");
        blockchain
            .create_transactions(vec![Transaction::new_mint(10.0, owner.clone())], None)
            .unwrap();

        let transfer = vec![Transaction::new(4.0, owner.clone(), bob.clone())];
        let result = blockchain.create_transactions(transfer.clone(), Some(&operator));

        assert!(matches!(result, Err(BlockchainError::StorageError(_))));
        assert_eq!(blockchain.blocks().len(), 2);
        assert_eq!(store.load_chain("ns", "alice").unwrap().unwrap().len(), 2);
        assert_eq!(blockchain.coins_in_wallet(Some(&bob)), 0.0);

        store.allow(1);
        blockchain.create_transactions(transfer, Some(&operator)).unwrap();

        let stored = store.load_chain("ns", "alice").unwrap().unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[2].transactions, vec![Transaction::new(4.0, owner, bob.clone())]);
        assert_eq!(stored[3].transactions.len(), 1);
        assert!((blockchain.coins_in_wallet(Some(&bob)) - 3.96).abs() < 1e-12);
        assert!(blockchain.validate());
    }
}
