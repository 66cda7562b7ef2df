use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use std::collections::BTreeMap;

use super::crypto::{sha256_hex, Address, HashError};
use super::transaction::Transaction;

/// Previous hash recorded by the first block of every chain
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Arbitrary metadata carried by a block
pub type BlockData = BTreeMap<String, Value>;

/// Proof-of-work result together with the measured cost of producing a block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NonceRecord {
    /// Nonce satisfying the difficulty predicate (0 for cost free blocks)
    pub nonce: u64,

    /// Elapsed work in microseconds, a relative cost only
    pub cpu: u64,
}

impl NonceRecord {
    /// Placeholder for blocks that skip proof-of-work
    pub const ZERO: NonceRecord = NonceRecord { nonce: 0, cpu: 0 };

    pub fn new(nonce: u64, cpu: u64) -> Self {
        NonceRecord { nonce, cpu }
    }
}

/// Chain metadata stored in the genesis block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisData {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub address: Address,
    pub cpu_factor: f64,
}

impl GenesisData {
    /// Converts the metadata into a block data map
    pub fn into_data(self) -> Result<BlockData, HashError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(BlockData::new()),
        }
    }

    /// Reads the metadata back from a block data map
    pub fn from_data(data: &BlockData) -> Option<Self> {
        let map: serde_json::Map<String, Value> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(map)).ok()
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position of the block in the chain, starting at 1
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary metadata (chain description on the genesis block)
    #[schema(value_type = Object)]
    pub data: BlockData,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Proof of work record
    pub nonce: NonceRecord,

    /// Hash of the previous block, "0" for the genesis block
    pub previous_block_hash: String,

    /// Hash of every other field of this block
    pub hash: String,
}

/// Everything a block hash covers; the hash itself is not a member
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHashView<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    data: &'a BlockData,
    transactions: &'a [Transaction],
    nonce: &'a NonceRecord,
    previous_block_hash: &'a str,
}

impl Block {
    /// Creates a new block on top of `tail`
    ///
    /// # Arguments
    ///
    /// * `tail` - The current last block of the chain, `None` for the genesis block
    /// * `transactions` - The list of transactions to include in the block
    /// * `nonce` - The proof-of-work record
    /// * `data` - Block metadata
    ///
    /// # Returns
    ///
    /// A new Block instance with its hash computed
    pub fn new(
        tail: Option<&Block>,
        transactions: Vec<Transaction>,
        nonce: NonceRecord,
        data: BlockData,
    ) -> Result<Self, HashError> {
        let (index, previous_block_hash) = match tail {
            Some(tail) => (tail.index + 1, tail.hash.clone()),
            None => (1, GENESIS_PREVIOUS_HASH.to_string()),
        };

        let mut block = Block {
            index,
            timestamp: Utc::now(),
            data,
            transactions,
            nonce,
            previous_block_hash,
            hash: String::new(),
        };
        block.hash = block.hash_block(None)?;

        Ok(block)
    }

    /// Calculates the hash of the block
    ///
    /// `nonce` replaces the stored nonce record when given; proof-of-work uses this
    /// to try candidates without building a new block each time.
    pub fn hash_block(&self, nonce: Option<&NonceRecord>) -> Result<String, HashError> {
        let view = BlockHashView {
            index: self.index,
            timestamp: &self.timestamp,
            data: &self.data,
            transactions: &self.transactions,
            nonce: nonce.unwrap_or(&self.nonce),
            previous_block_hash: &self.previous_block_hash,
        };

        sha256_hex(&view)
    }

    /// Recomputes the hash and compares it with the stored one
    pub fn validate(&self) -> bool {
        match self.hash_block(None) {
            Ok(hash) => hash == self.hash,
            Err(_) => false,
        }
    }

    /// Genesis metadata, if this block carries it
    pub fn genesis_data(&self) -> Option<GenesisData> {
        GenesisData::from_data(&self.data)
    }
}
