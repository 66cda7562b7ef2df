use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::fmt;

use crate::config::BlockchainConfig;

/// Errors that can occur while hashing a value
#[derive(Debug, Error)]
pub enum HashError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Hex encoded SHA-256 digest of the JSON form of `value`
///
/// Structs serialize in field declaration order and maps in key order, so two
/// structurally equal values always produce the same digest. Excluded fields must
/// be left out of the hashed type itself rather than skipped conditionally.
pub fn sha256_hex<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = serde_json::to_vec(value)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Ok(hex::encode(hasher.finalize()))
}

/// Represents an account identifier on a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// The system account every minted coin comes from
    pub fn mint() -> Self {
        Address(BlockchainConfig::MINT_ADDRESS.to_string())
    }

    /// Returns true for the system mint account
    pub fn is_mint(&self) -> bool {
        self.0 == BlockchainConfig::MINT_ADDRESS
    }

    /// Derives the owner address of chain `name` inside `namespace`
    ///
    /// The address is the dashless UUID v5 (URL namespace) of `http://{namespace}/{name}`,
    /// so the same chain always gets the same owner on every node.
    pub fn for_chain(namespace: &str, name: &str) -> Self {
        Self::from_url(&format!("http://{}/{}", namespace, name))
    }

    /// Derives the address of the node operator, the collector of all fees
    pub fn for_operator(namespace: &str) -> Self {
        Self::from_url(&format!("http://{}/i", namespace))
    }

    fn from_url(url: &str) -> Self {
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes());
        Address(uuid.simple().to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_is_deterministic() {
        let value = serde_json::json!({ "b": 2, "a": [1, 2, 3] });

        let first = sha256_hex(&value).unwrap();
        let second = sha256_hex(&value.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sha256_hex_known_digest() {
        // sha256 of the JSON string "abc" including its quotes
        let digest = sha256_hex("abc").unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"\"abc\"");
        assert_eq!(digest, hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_chain_address_derivation() {
        let alice = Address::for_chain("ns", "alice");
        let again = Address::for_chain("ns", "alice");
        let other_ns = Address::for_chain("other", "alice");

        assert_eq!(alice, again);
        assert_ne!(alice, other_ns);
        assert_eq!(alice.0.len(), 32);
        assert!(!alice.0.contains('-'));
        assert_ne!(Address::for_operator("ns"), Address::for_chain("ns", "o"));
    }

    #[test]
    fn test_mint_address() {
        assert!(Address::mint().is_mint());
        assert!(!Address::from("addr1").is_mint());
    }
}
