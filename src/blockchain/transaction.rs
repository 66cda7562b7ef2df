use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::Address;

/// Represents a transfer of coins between two accounts of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Amount being transferred
    pub amount: f64,

    /// Sender's address
    pub from: Address,

    /// Recipient's address
    pub to: Address,
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// # Arguments
    ///
    /// * `amount` - The amount to transfer
    /// * `from` - The address of the sender
    /// * `to` - The address of the recipient
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn new(amount: f64, from: Address, to: Address) -> Self {
        Transaction { amount, from, to }
    }

    /// Creates a transaction minting new coins for `to`
    pub fn new_mint(amount: f64, to: Address) -> Self {
        Transaction::new(amount, Address::mint(), to)
    }

    /// Checks if the coins of this transaction enter circulation
    pub fn is_mint(&self) -> bool {
        self.from.is_mint()
    }
}
