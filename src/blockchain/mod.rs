// Blockchain module
//
// This module contains the ledger core:
// - Hashing utility and addresses
// - Transaction and Block structures
// - Proof of work algorithm
// - Blockchain structure (one named coin) and its persistence
// - Multichain registry hosting every coin of a namespace

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod registry;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use account::AccountSummary;
pub use block::{Block, NonceRecord};
pub use chain::BlockchainError;
pub use crypto::Address;
pub use pow::SystemClock;
pub use registry::Multichain;
pub use storage::SledChainStore;
pub use transaction::Transaction;
