use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_chain::traits::Blockchain;
use trellis_types::command::CommandName;
use trellis_types::constants::{
    GET_BATCH_SIZE, GET_MIN_ACK_RESPONSES, PEER_RESPONSE_TIMEOUT, PUBLISH_BATCH_SIZE,
    PUBLISH_MIN_ACK_RESPONSES, UPDATE_BATCH_SIZE, UPDATE_MIN_ACK_RESPONSES,
};
use trellis_types::operation::OperationKind;
use trellis_types::primitives::Keyword;
use trellis_types::ual::Ual;

use crate::error::ProtocolError;
use crate::request::NetworkRequest;

/// Protocol tuning, one batch/quorum pair per operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub get_batch_size: usize,
    pub get_min_ack_responses: usize,
    pub publish_batch_size: usize,
    pub publish_min_ack_responses: usize,
    pub update_batch_size: usize,
    pub update_min_ack_responses: usize,
    pub peer_timeout_ms: u64,
}

impl ProtocolConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            get_batch_size: GET_BATCH_SIZE,
            get_min_ack_responses: GET_MIN_ACK_RESPONSES,
            publish_batch_size: PUBLISH_BATCH_SIZE,
            publish_min_ack_responses: PUBLISH_MIN_ACK_RESPONSES,
            update_batch_size: UPDATE_BATCH_SIZE,
            update_min_ack_responses: UPDATE_MIN_ACK_RESPONSES,
            peer_timeout_ms: PEER_RESPONSE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Where the candidate peers of one keyword come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerScope {
    /// Nodes of the shard responsible for the keyword.
    Shard(Keyword),
    /// Permissioned nodes of a curated paranet.
    Paranet(Ual),
}

/// Operation-specific parameters of the fan-out protocol.
#[async_trait]
pub trait ProtocolStrategy: Send + Sync {
    fn operation_kind(&self) -> OperationKind;

    /// Command that starts this protocol.
    fn command_name(&self) -> CommandName;

    /// Peers contacted concurrently per round.
    async fn batch_size(&self, blockchain: &str) -> Result<usize, ProtocolError>;

    /// Distinct successful replies needed to complete.
    async fn min_ack_responses(&self, blockchain: &str) -> Result<usize, ProtocolError>;

    /// Keywords to tally independently; one fan-out per keyword.
    fn keywords(&self, request: &NetworkRequest) -> Vec<Keyword> {
        vec![Keyword::new(request.request.ual().to_string())]
    }

    fn peer_scope(
        &self,
        keyword: &Keyword,
        request: &NetworkRequest,
    ) -> Result<PeerScope, ProtocolError>;
}

/// Open GET: any shard node may serve the content.
pub struct GetStrategy {
    batch_size: usize,
    min_ack_responses: usize,
}

impl GetStrategy {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            batch_size: config.get_batch_size,
            min_ack_responses: config.get_min_ack_responses,
        }
    }
}

#[async_trait]
impl ProtocolStrategy for GetStrategy {
    fn operation_kind(&self) -> OperationKind {
        OperationKind::Get
    }

    fn command_name(&self) -> CommandName {
        CommandName::NetworkGet
    }

    async fn batch_size(&self, _blockchain: &str) -> Result<usize, ProtocolError> {
        Ok(self.batch_size)
    }

    async fn min_ack_responses(&self, _blockchain: &str) -> Result<usize, ProtocolError> {
        Ok(self.min_ack_responses)
    }

    fn peer_scope(
        &self,
        keyword: &Keyword,
        _request: &NetworkRequest,
    ) -> Result<PeerScope, ProtocolError> {
        Ok(PeerScope::Shard(keyword.clone()))
    }
}

/// GET restricted to a curated paranet's permissioned nodes.
pub struct CuratedGetStrategy {
    inner: GetStrategy,
}

impl CuratedGetStrategy {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            inner: GetStrategy::new(config),
        }
    }
}

#[async_trait]
impl ProtocolStrategy for CuratedGetStrategy {
    fn operation_kind(&self) -> OperationKind {
        OperationKind::Get
    }

    fn command_name(&self) -> CommandName {
        CommandName::CuratedParanetNetworkGet
    }

    async fn batch_size(&self, blockchain: &str) -> Result<usize, ProtocolError> {
        self.inner.batch_size(blockchain).await
    }

    async fn min_ack_responses(&self, blockchain: &str) -> Result<usize, ProtocolError> {
        self.inner.min_ack_responses(blockchain).await
    }

    fn peer_scope(
        &self,
        _keyword: &Keyword,
        request: &NetworkRequest,
    ) -> Result<PeerScope, ProtocolError> {
        request
            .routing
            .as_ref()
            .and_then(|r| r.paranet_ual.clone())
            .map(PeerScope::Paranet)
            .ok_or_else(|| ProtocolError::InvalidRequest {
                reason: "curated GET requires a paranet UAL".to_string(),
            })
    }
}

/// Quorum read from the chain's minimum replication parameter, falling back
/// to configuration when the chain has none.
async fn replication_quorum(
    chain: &dyn Blockchain,
    blockchain: &str,
    fallback: usize,
) -> Result<usize, ProtocolError> {
    match chain.minimum_replications(blockchain).await? {
        Some(value) => {
            debug!(blockchain, value, "using on-chain minimum replications");
            Ok(value as usize)
        }
        None => Ok(fallback),
    }
}

pub struct PublishStrategy {
    chain: Arc<dyn Blockchain>,
    batch_size: usize,
    min_ack_responses: usize,
}

impl PublishStrategy {
    pub fn new(chain: Arc<dyn Blockchain>, config: &ProtocolConfig) -> Self {
        Self {
            chain,
            batch_size: config.publish_batch_size,
            min_ack_responses: config.publish_min_ack_responses,
        }
    }
}

#[async_trait]
impl ProtocolStrategy for PublishStrategy {
    fn operation_kind(&self) -> OperationKind {
        OperationKind::Publish
    }

    fn command_name(&self) -> CommandName {
        CommandName::NetworkPublish
    }

    async fn batch_size(&self, _blockchain: &str) -> Result<usize, ProtocolError> {
        Ok(self.batch_size)
    }

    async fn min_ack_responses(&self, blockchain: &str) -> Result<usize, ProtocolError> {
        replication_quorum(self.chain.as_ref(), blockchain, self.min_ack_responses).await
    }

    fn peer_scope(
        &self,
        keyword: &Keyword,
        _request: &NetworkRequest,
    ) -> Result<PeerScope, ProtocolError> {
        Ok(PeerScope::Shard(keyword.clone()))
    }
}

pub struct UpdateStrategy {
    chain: Arc<dyn Blockchain>,
    batch_size: usize,
    min_ack_responses: usize,
}

impl UpdateStrategy {
    pub fn new(chain: Arc<dyn Blockchain>, config: &ProtocolConfig) -> Self {
        Self {
            chain,
            batch_size: config.update_batch_size,
            min_ack_responses: config.update_min_ack_responses,
        }
    }
}

#[async_trait]
impl ProtocolStrategy for UpdateStrategy {
    fn operation_kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn command_name(&self) -> CommandName {
        CommandName::NetworkUpdate
    }

    async fn batch_size(&self, _blockchain: &str) -> Result<usize, ProtocolError> {
        Ok(self.batch_size)
    }

    async fn min_ack_responses(&self, blockchain: &str) -> Result<usize, ProtocolError> {
        replication_quorum(self.chain.as_ref(), blockchain, self.min_ack_responses).await
    }

    fn peer_scope(
        &self,
        keyword: &Keyword,
        _request: &NetworkRequest,
    ) -> Result<PeerScope, ProtocolError> {
        Ok(PeerScope::Shard(keyword.clone()))
    }
}
