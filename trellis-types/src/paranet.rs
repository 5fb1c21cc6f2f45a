use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::primitives::{BlockchainId, Timestamp};
use crate::ual::Ual;

/// Who may serve a paranet's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessPolicy {
    /// Any node on the network may hold and serve the content.
    Open,
    /// Only the paranet's permissioned nodes serve the content.
    Curated,
}

impl AccessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPolicy::Open => "OPEN",
            AccessPolicy::Curated => "CURATED",
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicy {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(AccessPolicy::Open),
            "CURATED" => Ok(AccessPolicy::Curated),
            _ => Err(TypesError::UnknownVariant {
                kind: "access policy",
                value: s.to_string(),
            }),
        }
    }
}

/// A paranet this node replicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paranet {
    pub ual: Ual,
    /// On-chain paranet id.
    pub id: String,
    pub blockchain: BlockchainId,
    pub access_policy: AccessPolicy,
}

/// On-chain coordinates of one knowledge collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionLocator {
    pub storage_contract: String,
    pub token_id: u64,
}

impl CollectionLocator {
    pub fn new(storage_contract: impl Into<String>, token_id: u64) -> Self {
        Self {
            storage_contract: storage_contract.into(),
            token_id,
        }
    }

    pub fn to_ual(&self, blockchain: &str) -> Ual {
        Ual::derive(blockchain, &self.storage_contract, self.token_id)
    }
}

/// Tracking row for one paranet member collection. Unique on (ual, paranet_ual).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParanetSyncRecord {
    pub paranet_ual: Ual,
    pub ual: Ual,
    pub blockchain_id: BlockchainId,
    pub is_synced: bool,
    pub retries: u32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ParanetSyncRecord {
    pub fn new(paranet_ual: Ual, ual: Ual, blockchain_id: &str, now: Timestamp) -> Self {
        Self {
            paranet_ual,
            ual,
            blockchain_id: blockchain_id.to_string(),
            is_synced: false,
            retries: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row may be picked up by a sync batch at `now`.
    pub fn is_eligible(&self, retries_limit: u32, retry_delay_ms: u64, now: Timestamp) -> bool {
        !self.is_synced
            && self.retries < retries_limit
            && (self.retries == 0 || now.saturating_sub(self.updated_at) >= retry_delay_ms)
    }
}

/// Named partition of the knowledge store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoragePartition {
    /// Plain published assets.
    Dkg,
    /// Latest state of synced public assets.
    PublicCurrent,
    /// A paranet's dedicated replica.
    Paranet(Ual),
    /// Latest state of an asset inside a paranet.
    ParanetCurrent(Ual),
    /// Historical states of an asset inside a paranet.
    ParanetHistorical { paranet: Ual, repo_id: String },
}

impl StoragePartition {
    pub fn name(&self) -> String {
        match self {
            StoragePartition::Dkg => "dkg".to_string(),
            StoragePartition::PublicCurrent => "public-current".to_string(),
            StoragePartition::Paranet(ual) => ual.repository_name(),
            StoragePartition::ParanetCurrent(ual) => {
                format!("{}-public-current", ual.repository_name())
            }
            StoragePartition::ParanetHistorical { paranet, repo_id } => {
                format!("{}-{}", paranet.repository_name(), repo_id)
            }
        }
    }
}

impl fmt::Display for StoragePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
