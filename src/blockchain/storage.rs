use std::path::Path;

#[cfg(test)]
use dashmap::DashMap;
use log::{debug, info};
use sled::Db;
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Durable home of every chain, keyed by namespace and chain name
///
/// Chains are always written and read whole. A save replaces the previous copy
/// atomically: readers see either the old list or the new one.
pub trait ChainStore: Send + Sync {
    /// Loads the ordered block list of a chain, `None` if it was never saved
    fn load_chain(&self, namespace: &str, name: &str) -> Result<Option<Vec<Block>>, StorageError>;

    /// Replaces the stored copy of a chain with `blocks`
    fn save_chain(&self, namespace: &str, name: &str, blocks: &[Block]) -> Result<(), StorageError>;

    /// Names of every chain stored under `namespace`, sorted
    fn list_chain_names(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Removes every chain stored under `namespace`
    fn delete_all(&self, namespace: &str) -> Result<(), StorageError>;
}

fn encode(blocks: &[Block]) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(blocks).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Vec<Block>, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

/// Chain store backed by a sled database, one tree per namespace
pub struct SledChainStore {
    /// The database instance
    db: Db,
}

impl std::fmt::Debug for SledChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledChainStore")
            .finish()
    }
}

impl SledChainStore {
    /// Opens (or creates) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree_name(namespace: &str) -> String {
        format!("chains/{}", namespace)
    }

    fn tree(&self, namespace: &str) -> Result<sled::Tree, StorageError> {
        Ok(self.db.open_tree(Self::tree_name(namespace))?)
    }
}

impl ChainStore for SledChainStore {
    fn load_chain(&self, namespace: &str, name: &str) -> Result<Option<Vec<Block>>, StorageError> {
        match self.tree(namespace)?.get(name.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn save_chain(&self, namespace: &str, name: &str, blocks: &[Block]) -> Result<(), StorageError> {
        let value = encode(blocks)?;
        let tree = self.tree(namespace)?;

        // A single insert replaces the whole value at once
        tree.insert(name.as_bytes(), value)?;
        tree.flush()?;

        debug!("Saved chain {} ({} blocks)", name, blocks.len());
        Ok(())
    }

    fn list_chain_names(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();

        for result in self.tree(namespace)?.iter().keys() {
            let key = result?;
            names.push(String::from_utf8_lossy(key.as_ref()).to_string());
        }

        Ok(names)
    }

    fn delete_all(&self, namespace: &str) -> Result<(), StorageError> {
        self.db.drop_tree(Self::tree_name(namespace))?;
        self.db.flush()?;

        info!("Deleted every chain in namespace {}", namespace);
        Ok(())
    }
}

/// Chain store that keeps serialized chains in memory
///
/// Chains go through the same JSON encoding as on disk, so what comes back from
/// a load is exactly what a sled-backed node would rebuild.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    chains: DashMap<(String, String), Vec<u8>>,
}

#[cfg(test)]
impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl ChainStore for MemoryChainStore {
    fn load_chain(&self, namespace: &str, name: &str) -> Result<Option<Vec<Block>>, StorageError> {
        let key = (namespace.to_string(), name.to_string());
        match self.chains.get(&key) {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn save_chain(&self, namespace: &str, name: &str, blocks: &[Block]) -> Result<(), StorageError> {
        let value = encode(blocks)?;
        self.chains.insert((namespace.to_string(), name.to_string()), value);
        Ok(())
    }

    fn list_chain_names(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .chains
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn delete_all(&self, namespace: &str) -> Result<(), StorageError> {
        self.chains.retain(|key, _| key.0 != namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::{BlockData, NonceRecord};
    use crate::blockchain::{Address, Transaction};

    fn sample_chain() -> Vec<Block> {
        let genesis = Block::new(None, Vec::new(), NonceRecord::ZERO, BlockData::new()).unwrap();
        let transactions = vec![
            Transaction::new_mint(10.0, Address::from("owner")),
            Transaction::new(0.000_031_7, Address::from("owner"), Address::from("fees")),
        ];
        let block = Block::new(Some(&genesis), transactions, NonceRecord::new(12, 345), BlockData::new()).unwrap();
        vec![genesis, block]
    }

    fn check_round_trip(store: &dyn ChainStore) {
        let chain = sample_chain();

        assert!(store.load_chain("ns", "alice").unwrap().is_none());

        store.save_chain("ns", "alice", &chain).unwrap();
        let loaded = store.load_chain("ns", "alice").unwrap().unwrap();

        assert_eq!(loaded, chain);
        for (loaded, original) in loaded.iter().zip(chain.iter()) {
            assert_eq!(loaded.hash, original.hash);
            assert!(loaded.validate());
        }
    }

    fn check_listing_and_reset(store: &dyn ChainStore) {
        let chain = sample_chain();
        store.save_chain("ns", "bob", &chain).unwrap();
        store.save_chain("ns", "alice", &chain).unwrap();
        store.save_chain("other", "carol", &chain).unwrap();

        assert_eq!(store.list_chain_names("ns").unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.list_chain_names("other").unwrap(), vec!["carol"]);

        store.delete_all("ns").unwrap();

        assert!(store.list_chain_names("ns").unwrap().is_empty());
        assert!(store.load_chain("ns", "alice").unwrap().is_none());
        assert_eq!(store.list_chain_names("other").unwrap(), vec!["carol"]);
    }

    #[test]
    fn test_sled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledChainStore::new(dir.path()).unwrap();
        check_round_trip(&store);
    }

    #[test]
    fn test_sled_listing_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledChainStore::new(dir.path()).unwrap();
        check_listing_and_reset(&store);
    }

    #[test]
    fn test_save_replaces_previous_copy() {
        let store = MemoryChainStore::new();
        let chain = sample_chain();

        store.save_chain("ns", "alice", &chain).unwrap();
        store.save_chain("ns", "alice", &chain[..1]).unwrap();

        assert_eq!(store.load_chain("ns", "alice").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_round_trip() {
        check_round_trip(&MemoryChainStore::new());
    }

    #[test]
    fn test_memory_listing_and_reset() {
        check_listing_and_reset(&MemoryChainStore::new());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledChainStore::new(dir.path()).unwrap();
        store.tree("ns").unwrap().insert("alice".as_bytes(), b"not json".to_vec()).unwrap();

        let result = store.load_chain("ns", "alice");
        assert!(matches!(result, Err(StorageError::DeserializationError(_))));
    }
}
