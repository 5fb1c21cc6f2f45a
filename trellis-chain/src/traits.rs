use async_trait::async_trait;

use trellis_types::paranet::CollectionLocator;

use crate::error::ChainError;

/// Read-only view of the chains the node is anchored on.
///
/// Every call names the blockchain it targets, since one node may follow
/// several chains at once.
#[async_trait]
pub trait Blockchain: Send + Sync {
    /// Number of knowledge collections registered in a paranet.
    async fn paranet_collection_count(
        &self,
        blockchain: &str,
        paranet_id: &str,
    ) -> Result<u64, ChainError>;

    /// One page of a paranet's member collections, in registration order.
    async fn paranet_collection_locators(
        &self,
        blockchain: &str,
        paranet_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<CollectionLocator>, ChainError>;

    /// Historical assertion roots of a collection, oldest first.
    async fn collection_merkle_roots(
        &self,
        blockchain: &str,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<String>, ChainError>;

    /// On-chain minimum replication factor, when the chain exposes one.
    async fn minimum_replications(&self, blockchain: &str) -> Result<Option<u32>, ChainError>;
}
