use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::client::BlockAck;
use crate::errors::{ChainError, ChainResult};
use crate::node::NodeHandle;
use crate::types::{Account, AccountId, Block, PeerStatus, SignedTx};
use crate::worker::Worker;

#[derive(Clone)]
pub struct AppState {
    pub node: NodeHandle,
    pub worker: Arc<Worker>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    hash: String,
    mempool_length: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    account: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/genesis", get(genesis))
        .route("/v1/accounts", get(accounts))
        .route("/v1/accounts/:account_id", get(account))
        .route("/v1/tx/submit", post(submit_tx))
        .route("/v1/node/status", get(node_status))
        .route("/v1/node/block/list/:from/:to", get(block_list))
        .route("/v1/node/block/next", post(block_next))
        .route("/v1/node/tx/add", post(add_transactions))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> ChainResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|err| ChainError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        account: state.node.beneficiary().to_string(),
    })
}

async fn genesis(State(state): State<AppState>) -> Json<crate::genesis::Genesis> {
    Json(state.node.genesis().clone())
}

async fn accounts(
    State(state): State<AppState>,
) -> Json<std::collections::HashMap<AccountId, Account>> {
    Json(state.node.copy_accounts())
}

async fn account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Account>, (StatusCode, Json<ErrorResponse>)> {
    let account_id = AccountId::from_hex(&account_id).map_err(error_reply)?;
    Ok(Json(state.node.account(&account_id)))
}

/// Wallet-facing submission: accepted transactions are gossiped to peers and
/// mining is signalled once a full block is pending.
async fn submit_tx(
    State(state): State<AppState>,
    Json(tx): Json<SignedTx>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    let hash = tx.hash();
    let mempool_length = state
        .node
        .submit_transaction(tx.clone())
        .map_err(error_reply)?;
    state.worker.signal_share_transactions(vec![tx]);
    signal_mining_at_threshold(&state);
    Ok(Json(SubmitResponse {
        hash,
        mempool_length,
    }))
}

async fn node_status(State(state): State<AppState>) -> Json<PeerStatus> {
    Json(state.node.node_status())
}

async fn block_list(
    State(state): State<AppState>,
    Path((from, to)): Path<(u64, String)>,
) -> Result<Json<Vec<Block>>, (StatusCode, Json<ErrorResponse>)> {
    let to = match to.as_str() {
        "latest" => state.node.copy_latest_block().header.number,
        value => value.parse::<u64>().map_err(|_| {
            error_reply(ChainError::Config(format!("invalid block number: {value}")))
        })?,
    };
    state
        .node
        .block_range(from, to)
        .map(Json)
        .map_err(error_reply)
}

async fn block_next(
    State(state): State<AppState>,
    Json(block): Json<Block>,
) -> Result<Json<BlockAck>, (StatusCode, Json<ErrorResponse>)> {
    state
        .node
        .write_next_block(block.clone())
        .map_err(error_reply)?;
    Ok(Json(BlockAck {
        status: "accepted".into(),
        block,
    }))
}

/// Peer gossip intake: transactions are added without being re-shared, which
/// keeps a gossiped batch from circulating forever.
async fn add_transactions(
    State(state): State<AppState>,
    Json(txs): Json<Vec<SignedTx>>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    for tx in txs {
        state.node.submit_transaction(tx).map_err(error_reply)?;
    }
    signal_mining_at_threshold(&state);
    Ok(StatusCode::NO_CONTENT)
}

fn signal_mining_at_threshold(state: &AppState) {
    if state.node.query_mempool_length() >= state.node.genesis().trans_per_block as usize {
        state.worker.signal_start_mining();
    }
}

fn error_reply(err: ChainError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        ChainError::ChainForked => StatusCode::CONFLICT,
        ChainError::InvalidSignature(_)
        | ChainError::WrongChainId { .. }
        | ChainError::SelfTransfer
        | ChainError::NonceTooSmall { .. }
        | ChainError::InsufficientFunds { .. }
        | ChainError::BlockValidation(_)
        | ChainError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        error: err.to_string(),
    };
    (status, Json(body))
}
