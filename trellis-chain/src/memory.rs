use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use trellis_types::paranet::CollectionLocator;

use crate::error::ChainError;
use crate::traits::Blockchain;

#[derive(Default)]
struct ChainState {
    paranets: HashMap<(String, String), Vec<CollectionLocator>>,
    merkle_roots: HashMap<(String, String, u64), Vec<String>>,
    minimum_replications: HashMap<String, u32>,
}

/// In-memory chain used by tests and dev mode.
///
/// Can be switched to "unavailable", after which every read fails with
/// [`ChainError::BlockchainRead`].
pub struct MemoryChain {
    state: RwLock<ChainState>,
    unavailable: AtomicBool,
    locator_pages: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            unavailable: AtomicBool::new(false),
            locator_pages: AtomicUsize::new(0),
        }
    }

    /// Register a paranet with no members yet.
    pub fn add_paranet(&self, blockchain: &str, paranet_id: &str) {
        if let Ok(mut state) = self.state.write() {
            state
                .paranets
                .entry((blockchain.to_string(), paranet_id.to_string()))
                .or_default();
        }
    }

    /// Append a collection to a paranet, registering the paranet if needed.
    pub fn add_paranet_member(&self, blockchain: &str, paranet_id: &str, locator: CollectionLocator) {
        if let Ok(mut state) = self.state.write() {
            state
                .paranets
                .entry((blockchain.to_string(), paranet_id.to_string()))
                .or_default()
                .push(locator);
        }
    }

    pub fn set_merkle_roots(&self, blockchain: &str, contract: &str, token_id: u64, roots: Vec<String>) {
        if let Ok(mut state) = self.state.write() {
            state.merkle_roots.insert(
                (blockchain.to_string(), contract.to_lowercase(), token_id),
                roots,
            );
        }
    }

    pub fn set_minimum_replications(&self, blockchain: &str, value: u32) {
        if let Ok(mut state) = self.state.write() {
            state
                .minimum_replications
                .insert(blockchain.to_string(), value);
        }
    }

    /// Simulate an RPC outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of membership pages served so far.
    pub fn locator_pages_served(&self) -> usize {
        self.locator_pages.load(Ordering::SeqCst)
    }

    fn check_available(&self, blockchain: &str) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::BlockchainRead {
                blockchain: blockchain.to_string(),
                reason: "rpc endpoint unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn read_state<T>(
        &self,
        blockchain: &str,
        f: impl FnOnce(&ChainState) -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        self.check_available(blockchain)?;
        let state = self.state.read().map_err(|e| ChainError::BlockchainRead {
            blockchain: blockchain.to_string(),
            reason: e.to_string(),
        })?;
        f(&state)
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_paranet(blockchain: &str, paranet_id: &str) -> ChainError {
    ChainError::UnknownParanet {
        blockchain: blockchain.to_string(),
        paranet_id: paranet_id.to_string(),
    }
}

#[async_trait]
impl Blockchain for MemoryChain {
    async fn paranet_collection_count(
        &self,
        blockchain: &str,
        paranet_id: &str,
    ) -> Result<u64, ChainError> {
        self.read_state(blockchain, |state| {
            state
                .paranets
                .get(&(blockchain.to_string(), paranet_id.to_string()))
                .map(|members| members.len() as u64)
                .ok_or_else(|| unknown_paranet(blockchain, paranet_id))
        })
    }

    async fn paranet_collection_locators(
        &self,
        blockchain: &str,
        paranet_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<CollectionLocator>, ChainError> {
        let page = self.read_state(blockchain, |state| {
            let members = state
                .paranets
                .get(&(blockchain.to_string(), paranet_id.to_string()))
                .ok_or_else(|| unknown_paranet(blockchain, paranet_id))?;
            Ok(members
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        })?;
        self.locator_pages.fetch_add(1, Ordering::SeqCst);
        Ok(page)
    }

    async fn collection_merkle_roots(
        &self,
        blockchain: &str,
        contract: &str,
        token_id: u64,
    ) -> Result<Vec<String>, ChainError> {
        self.read_state(blockchain, |state| {
            state
                .merkle_roots
                .get(&(blockchain.to_string(), contract.to_lowercase(), token_id))
                .cloned()
                .ok_or_else(|| ChainError::UnknownCollection {
                    blockchain: blockchain.to_string(),
                    contract: contract.to_string(),
                    token_id,
                })
        })
    }

    async fn minimum_replications(&self, blockchain: &str) -> Result<Option<u32>, ChainError> {
        self.read_state(blockchain, |state| {
            Ok(state.minimum_replications.get(blockchain).copied())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = "otp:2043";

    #[tokio::test]
    async fn test_membership_paging() {
        let chain = MemoryChain::new();
        for token in 1..=5 {
            chain.add_paranet_member(CHAIN, "p1", CollectionLocator::new("0xKC", token));
        }
        assert_eq!(chain.paranet_collection_count(CHAIN, "p1").await.unwrap(), 5);

        let page = chain
            .paranet_collection_locators(CHAIN, "p1", 3, 10)
            .await
            .unwrap();
        let tokens: Vec<u64> = page.iter().map(|l| l.token_id).collect();
        assert_eq!(tokens, vec![4, 5]);
        assert!(chain
            .paranet_collection_locators(CHAIN, "p1", 5, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(chain.locator_pages_served(), 2);
    }

    #[tokio::test]
    async fn test_unknown_paranet_and_collection() {
        let chain = MemoryChain::new();
        assert!(matches!(
            chain.paranet_collection_count(CHAIN, "nope").await,
            Err(ChainError::UnknownParanet { .. })
        ));
        assert!(matches!(
            chain.collection_merkle_roots(CHAIN, "0xkc", 1).await,
            Err(ChainError::UnknownCollection { .. })
        ));
        chain.add_paranet(CHAIN, "empty");
        assert_eq!(chain.paranet_collection_count(CHAIN, "empty").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merkle_roots_contract_is_case_insensitive() {
        let chain = MemoryChain::new();
        chain.set_merkle_roots(CHAIN, "0xKC", 9, vec!["0xa".into(), "0xb".into()]);
        let roots = chain.collection_merkle_roots(CHAIN, "0xkc", 9).await.unwrap();
        assert_eq!(roots, vec!["0xa".to_string(), "0xb".to_string()]);
    }

    #[tokio::test]
    async fn test_outage_fails_every_read() {
        let chain = MemoryChain::new();
        chain.add_paranet(CHAIN, "p1");
        chain.set_unavailable(true);
        let err = chain.paranet_collection_count(CHAIN, "p1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(chain.minimum_replications(CHAIN).await.is_err());
        chain.set_unavailable(false);
        assert_eq!(chain.minimum_replications(CHAIN).await.unwrap(), None);
    }
}
