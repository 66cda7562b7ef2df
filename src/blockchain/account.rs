use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::Block;
use super::crypto::Address;

/// Balance of one chain owner as seen on another chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    /// Path of the owner's view of the chain, `{owner}/{chain}`
    pub home: String,

    /// Name of the chain this account owns
    pub name: String,

    /// The account's address
    pub address: Address,

    /// Net balance on the queried chain
    pub coins: f64,
}

/// Circulating coins of a chain next to one account's share of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChainBalance {
    pub coins_in_eco: f64,
    pub coins_in_wallet: f64,
}

/// Total amount ever minted, i.e. the sum of every transaction sent by the mint account
pub fn coins_in_eco(blocks: &[Block]) -> f64 {
    blocks
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|transaction| transaction.is_mint())
        .fold(0.0, |total, transaction| total + transaction.amount)
}

/// Net balance of `address`: everything received minus everything sent
///
/// Balances are never stored; every call scans the full transaction history.
pub fn coins_in_wallet(blocks: &[Block], address: &Address) -> f64 {
    blocks
        .iter()
        .flat_map(|block| block.transactions.iter())
        .fold(0.0, |mut balance, transaction| {
            if &transaction.to == address {
                balance += transaction.amount;
            }
            if &transaction.from == address {
                balance -= transaction.amount;
            }
            balance
        })
}
