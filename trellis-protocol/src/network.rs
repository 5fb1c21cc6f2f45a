use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use trellis_types::operation::{Assertion, OperationKind};
use trellis_types::primitives::{Keyword, PeerId};
use trellis_types::ual::Ual;

use crate::error::ProtocolError;

/// Request body sent to each peer of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtocolRequest {
    /// Fetch one state of a collection.
    Get { ual: Ual, state: String },
    /// Replicate a newly published collection state.
    Publish {
        ual: Ual,
        state: String,
        assertion: Assertion,
    },
    /// Replicate a new state of an existing collection.
    Update {
        ual: Ual,
        state: String,
        assertion: Assertion,
    },
}

impl ProtocolRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            ProtocolRequest::Get { .. } => OperationKind::Get,
            ProtocolRequest::Publish { .. } => OperationKind::Publish,
            ProtocolRequest::Update { .. } => OperationKind::Update,
        }
    }

    pub fn ual(&self) -> &Ual {
        match self {
            ProtocolRequest::Get { ual, .. }
            | ProtocolRequest::Publish { ual, .. }
            | ProtocolRequest::Update { ual, .. } => ual,
        }
    }

    /// Merkle root of the state the request is about.
    pub fn state(&self) -> &str {
        match self {
            ProtocolRequest::Get { state, .. }
            | ProtocolRequest::Publish { state, .. }
            | ProtocolRequest::Update { state, .. } => state,
        }
    }

    pub fn assertion(&self) -> Option<&Assertion> {
        match self {
            ProtocolRequest::Get { .. } => None,
            ProtocolRequest::Publish { assertion, .. }
            | ProtocolRequest::Update { assertion, .. } => Some(assertion),
        }
    }
}

/// A peer's answer to a [`ProtocolRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerResponse {
    /// Request served. GET replies carry the assertion.
    Ack { assertion: Option<Assertion> },
    /// Request refused, e.g. the peer does not hold the content.
    Nack { reason: String },
}

impl PeerResponse {
    /// Whether this reply counts towards the quorum of a `kind` operation.
    pub fn satisfies(&self, kind: OperationKind) -> bool {
        match self {
            PeerResponse::Ack { assertion } => kind != OperationKind::Get || assertion.is_some(),
            PeerResponse::Nack { .. } => false,
        }
    }
}

/// Peer discovery and transport.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Peers responsible for `keyword` on `blockchain`, closest first.
    async fn find_shard_peers(
        &self,
        blockchain: &str,
        keyword: &Keyword,
    ) -> Result<Vec<PeerId>, ProtocolError>;

    /// Permissioned nodes of a curated paranet.
    async fn paranet_peers(
        &self,
        blockchain: &str,
        paranet_ual: &Ual,
    ) -> Result<Vec<PeerId>, ProtocolError>;

    /// Send one request and wait for the reply.
    async fn send(
        &self,
        peer: &PeerId,
        request: &ProtocolRequest,
    ) -> Result<PeerResponse, ProtocolError>;
}
