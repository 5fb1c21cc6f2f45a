use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypesError;
use crate::primitives::{BlockchainId, Timestamp};

/// Identifier of a network operation, shared by every command working on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypesError::InvalidOperationId {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Kind of network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Get,
    Publish,
    Update,
    ParanetSync,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "GET",
            OperationKind::Publish => "PUBLISH",
            OperationKind::Update => "UPDATE",
            OperationKind::ParanetSync => "PARANET_SYNC",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(OperationKind::Get),
            "PUBLISH" => Ok(OperationKind::Publish),
            "UPDATE" => Ok(OperationKind::Update),
            "PARANET_SYNC" => Ok(OperationKind::ParanetSync),
            other => Err(TypesError::UnknownVariant {
                kind: "operation kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Phase of an operation. Only `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    NetworkProtocolStart,
    BatchSizeResolved,
    FetchFromNodesStart,
    FetchFromNodesEnd,
    LocalGetStart,
    LocalGetEnd,
    ParanetSyncStart,
    ParanetSyncMissedStart,
    ParanetSyncMissedEnd,
    Completed,
    Failed,
}

impl OperationStatus {
    const ALL: [OperationStatus; 12] = [
        OperationStatus::Pending,
        OperationStatus::NetworkProtocolStart,
        OperationStatus::BatchSizeResolved,
        OperationStatus::FetchFromNodesStart,
        OperationStatus::FetchFromNodesEnd,
        OperationStatus::LocalGetStart,
        OperationStatus::LocalGetEnd,
        OperationStatus::ParanetSyncStart,
        OperationStatus::ParanetSyncMissedStart,
        OperationStatus::ParanetSyncMissedEnd,
        OperationStatus::Completed,
        OperationStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::NetworkProtocolStart => "NETWORK_PROTOCOL_START",
            OperationStatus::BatchSizeResolved => "BATCH_SIZE_RESOLVED",
            OperationStatus::FetchFromNodesStart => "FETCH_FROM_NODES_START",
            OperationStatus::FetchFromNodesEnd => "FETCH_FROM_NODES_END",
            OperationStatus::LocalGetStart => "LOCAL_GET_START",
            OperationStatus::LocalGetEnd => "LOCAL_GET_END",
            OperationStatus::ParanetSyncStart => "PARANET_SYNC_START",
            OperationStatus::ParanetSyncMissedStart => "PARANET_SYNC_MISSED_KCS_SYNC_START",
            OperationStatus::ParanetSyncMissedEnd => "PARANET_SYNC_MISSED_KCS_SYNC_END",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| TypesError::UnknownVariant {
                kind: "operation status",
                value: s.to_string(),
            })
    }
}

/// Content of one knowledge-collection state, as n-quads.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Assertion {
    pub public: Vec<String>,
    #[serde(default)]
    pub private: Vec<String>,
}

impl Assertion {
    pub fn new(public: Vec<String>) -> Self {
        Self {
            public,
            private: Vec::new(),
        }
    }

    /// Total number of n-quads across public and private parts.
    pub fn len(&self) -> usize {
        self.public.len() + self.private.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cached outcome of an operation, polled by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationResult {
    Found { assertion: Assertion },
    NotFound { message: String },
    Acknowledged { acks: u32 },
    SyncSummary { synced: u32, failed: u32 },
    Error { message: String },
}

impl OperationResult {
    pub fn assertion(&self) -> Option<&Assertion> {
        match self {
            OperationResult::Found { assertion } => Some(assertion),
            _ => None,
        }
    }
}

/// A network operation as tracked by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub blockchain: BlockchainId,
    pub status: OperationStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Operation {
    pub fn new(
        id: OperationId,
        kind: OperationKind,
        blockchain: impl Into<BlockchainId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            kind,
            blockchain: blockchain.into(),
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }
}
