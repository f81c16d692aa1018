use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};
use crate::types::{Block, Peer, PeerStatus, SignedTx};

/// Acknowledgement returned by a peer that accepted an announced block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockAck {
    pub status: String,
    pub block: Block,
}

/// Outbound RPC calls to other nodes. One client is shared by every worker
/// activity; requests are independent and carry no session state.
#[derive(Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ChainError::Config(format!("unable to build http client: {err}")))?;
        Ok(Self { client })
    }

    pub async fn status(&self, peer: &Peer) -> ChainResult<PeerStatus> {
        let url = format!("{}/status", base_url(peer));
        self.send::<(), PeerStatus>(Method::GET, &url, None)
            .await?
            .ok_or_else(|| ChainError::PeerRejected("status response had no body".into()))
    }

    pub async fn block_list(&self, peer: &Peer, from: u64) -> ChainResult<Vec<Block>> {
        let url = format!("{}/block/list/{from}/latest", base_url(peer));
        Ok(self
            .send::<(), Vec<Block>>(Method::GET, &url, None)
            .await?
            .unwrap_or_default())
    }

    pub async fn announce_block(&self, peer: &Peer, block: &Block) -> ChainResult<Option<BlockAck>> {
        let url = format!("{}/block/next", base_url(peer));
        self.send(Method::POST, &url, Some(block)).await
    }

    pub async fn share_transactions(&self, peer: &Peer, txs: &[SignedTx]) -> ChainResult<()> {
        let url = format!("{}/tx/add", base_url(peer));
        let _: Option<serde_json::Value> = self.send(Method::POST, &url, Some(&txs)).await?;
        Ok(())
    }

    /// Uniform request helper: optional JSON body, optional JSON response.
    /// `204` is success without a body, `200` decodes the body, and any other
    /// status becomes an error carrying the response text verbatim.
    async fn send<B, R>(&self, method: Method, url: &str, body: Option<&B>) -> ChainResult<Option<R>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ChainError::PeerUnreachable(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ChainError::PeerRejected(text));
        }
        let decoded = response
            .json::<R>()
            .await
            .map_err(|err| ChainError::PeerRejected(format!("undecodable response: {err}")))?;
        Ok(Some(decoded))
    }
}

fn base_url(peer: &Peer) -> String {
    format!("http://{}/v1/node", peer.host)
}
