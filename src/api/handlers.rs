use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::pow::PowError;
use crate::blockchain::{AccountSummary, Address, Block, BlockchainError, Multichain};
use crate::config::NodeConfig;

/// Data structure for the registry of chains
pub type MultichainData = web::Data<Multichain>;

/// Node configuration shared with the handlers
pub type ConfigData = web::Data<NodeConfig>;

/// Maps a ledger error to an HTTP response
fn error_response(err: BlockchainError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        BlockchainError::UnknownChain(_) => HttpResponse::NotFound().json(body),
        BlockchainError::InvalidChainName(_) | BlockchainError::InvalidAmount(_) => {
            HttpResponse::BadRequest().json(body)
        }
        BlockchainError::InvalidChain(_) => HttpResponse::Conflict().json(body),
        BlockchainError::ProofOfWorkError(PowError::Cancelled { .. }) => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        err => {
            warn!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Response for the home endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HomeResponse {
    /// The name of the chain
    pub coin_name: String,

    /// The namespace hosting the chain
    pub namespace: String,

    /// The owner of the chain
    pub owner_address: Address,

    /// Coins ever minted on the chain
    pub coins_in_eco: f64,

    /// Coins held by the owner
    pub coins_in_wallet: f64,

    /// Balance of every chain owner on this chain
    pub accounts: Vec<AccountSummary>,
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// The queried address
    pub address: Address,

    /// Net balance of the address
    pub balance: f64,
}

/// Response for the partner endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartnerResponse {
    /// The chain being looked at
    pub coin_name: String,

    /// The chain whose owner is looking
    pub from: String,

    /// Coins ever minted on the chain
    pub coins_in_eco: f64,

    /// Coins of `from`'s owner on the chain
    pub coins_in_wallet: f64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The chain to mine on
    pub from: String,

    /// Coins to mint, the node's mining reward when absent
    pub amount: Option<f64>,
}

/// Request for the transfer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// The chain the coins move on, its owner pays
    pub from: String,

    /// The chain whose owner receives the coins
    pub to: String,

    /// The amount to transfer
    pub amount: f64,
}

/// List chains
///
/// Returns the names of every chain hosted by the node
#[utoipa::path(
    get,
    path = "/api/v1/chains",
    responses(
        (status = 200, description = "Chain names retrieved successfully", body = Vec<String>)
    )
)]
pub async fn list_chains(multichain: MultichainData) -> impl Responder {
    HttpResponse::Ok().json(multichain.names())
}

/// Open a chain
///
/// Returns the overview of a chain, creating it on first visit
#[utoipa::path(
    get,
    path = "/api/v1/chains/{name}",
    params(
        ("name" = String, Path, description = "Chain name")
    ),
    responses(
        (status = 200, description = "Chain opened successfully", body = HomeResponse),
        (status = 400, description = "Invalid chain name"),
        (status = 409, description = "Stored chain is invalid")
    )
)]
pub async fn get_home(multichain: MultichainData, name: web::Path<String>) -> impl Responder {
    let name = name.into_inner();

    let chain = match multichain.open(&name).await {
        Ok(chain) => chain,
        Err(err) => return error_response(err),
    };

    let mut home = {
        let blockchain = chain.read().await;
        HomeResponse {
            coin_name: blockchain.name().to_string(),
            namespace: blockchain.namespace().to_string(),
            owner_address: blockchain.owner_address().clone(),
            coins_in_eco: blockchain.coins_in_eco(),
            coins_in_wallet: blockchain.coins_in_wallet(None),
            accounts: Vec::new(),
        }
    };

    match multichain.accounts(&name).await {
        Ok(accounts) => {
            home.accounts = accounts;
            HttpResponse::Ok().json(home)
        }
        Err(err) => error_response(err),
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chains/{name}/blocks",
    params(
        ("name" = String, Path, description = "Chain name")
    ),
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 404, description = "Unknown chain")
    )
)]
pub async fn get_chain(multichain: MultichainData, name: web::Path<String>) -> impl Responder {
    let chain = match multichain.get(&name) {
        Ok(chain) => chain,
        Err(err) => return error_response(err),
    };

    let blockchain = chain.read().await;
    let blocks = blockchain.blocks().to_vec();

    HttpResponse::Ok().json(ChainResponse {
        length: blocks.len(),
        chain: blocks,
        is_valid: blockchain.validate(),
    })
}

/// Check if a blockchain is valid
///
/// Validates the entire blockchain
#[utoipa::path(
    get,
    path = "/api/v1/chains/{name}/validate",
    params(
        ("name" = String, Path, description = "Chain name")
    ),
    responses(
        (status = 200, description = "Blockchain validation status", body = bool),
        (status = 404, description = "Unknown chain")
    )
)]
pub async fn validate_chain(multichain: MultichainData, name: web::Path<String>) -> impl Responder {
    match multichain.get(&name) {
        Ok(chain) => HttpResponse::Ok().json(chain.read().await.validate()),
        Err(err) => error_response(err),
    }
}

/// Get wallet balance
///
/// Returns the balance of an address on a chain
#[utoipa::path(
    get,
    path = "/api/v1/chains/{name}/balance/{address}",
    params(
        ("name" = String, Path, description = "Chain name"),
        ("address" = String, Path, description = "Account address")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse),
        (status = 404, description = "Unknown chain")
    )
)]
pub async fn get_balance(multichain: MultichainData, path: web::Path<(String, String)>) -> impl Responder {
    let (name, address) = path.into_inner();
    let address = Address(address);

    match multichain.get(&name) {
        Ok(chain) => {
            let balance = chain.read().await.coins_in_wallet(Some(&address));
            HttpResponse::Ok().json(BalanceResponse { address, balance })
        }
        Err(err) => error_response(err),
    }
}

/// Look at another chain
///
/// Returns the coins of the owner of `from` on chain `chain`
#[utoipa::path(
    get,
    path = "/api/v1/chains/{from}/partner/{chain}",
    params(
        ("from" = String, Path, description = "Chain whose owner is looking"),
        ("chain" = String, Path, description = "Chain being looked at")
    ),
    responses(
        (status = 200, description = "Partner view retrieved successfully", body = PartnerResponse),
        (status = 404, description = "Unknown chain")
    )
)]
pub async fn get_partner(multichain: MultichainData, path: web::Path<(String, String)>) -> impl Responder {
    let (from, chain) = path.into_inner();

    match multichain.partner(&from, &chain).await {
        Ok(balance) => HttpResponse::Ok().json(PartnerResponse {
            coin_name: chain,
            from,
            coins_in_eco: balance.coins_in_eco,
            coins_in_wallet: balance.coins_in_wallet,
        }),
        Err(err) => error_response(err),
    }
}

/// Mine new coins
///
/// Runs proof-of-work on a chain and mints coins for its owner
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Coins mined successfully", body = crate::blockchain::NonceRecord),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "Unknown chain"),
        (status = 503, description = "Mining was interrupted by a reset")
    )
)]
pub async fn mine(
    multichain: MultichainData,
    config: ConfigData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let amount = mine_req.amount.unwrap_or(config.mining_reward);

    match multichain.mine(&mine_req.from, amount).await {
        Ok(nonce) => HttpResponse::Ok().json(nonce),
        Err(err) => error_response(err),
    }
}

/// Transfer coins
///
/// Moves coins from the owner of one chain to the owner of another, on the first chain
#[utoipa::path(
    post,
    path = "/api/v1/transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Transfer recorded successfully", body = crate::blockchain::NonceRecord),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "Unknown chain")
    )
)]
pub async fn transfer(
    multichain: MultichainData,
    transfer_req: web::Json<TransferRequest>,
) -> impl Responder {
    match multichain
        .transfer(&transfer_req.from, &transfer_req.to, transfer_req.amount)
        .await
    {
        Ok(nonce) => HttpResponse::Ok().json(nonce),
        Err(err) => error_response(err),
    }
}
