use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use trellis_chain::traits::Blockchain;
use trellis_protocol::request::GetRouting;
use trellis_protocol::service::{FetchMode, OperationService};
use trellis_storage::knowledge::TripleStore;
use trellis_types::operation::{Assertion, OperationId, OperationResult, OperationStatus};
use trellis_types::paranet::{AccessPolicy, Paranet, StoragePartition};
use trellis_types::ual::Ual;

use crate::error::SyncError;

/// Obtains the content of one collection state for a paranet.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    async fn fetch_state(
        &self,
        paranet: &Paranet,
        ual: &Ual,
        state: &str,
    ) -> Result<Assertion, SyncError>;
}

/// Fetches through GET operations: local storage first, then the network
/// variant matching the paranet's access policy, reusing one operation id.
pub struct CommandStateFetcher {
    service: OperationService,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl CommandStateFetcher {
    pub fn new(service: OperationService, poll_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_attempts,
            poll_interval,
        }
    }

    /// Wait for the GET to settle. `Ok(None)` means it did not complete
    /// with content (failed, not found, or still running).
    async fn settle(&self, id: &OperationId) -> Result<Option<OperationResult>, SyncError> {
        let settled = self
            .service
            .await_terminal(id, self.poll_attempts, self.poll_interval)
            .await?;
        match settled {
            Some(op) if op.status == OperationStatus::Completed => Ok(self.service.result(id)?),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl StateFetcher for CommandStateFetcher {
    async fn fetch_state(
        &self,
        paranet: &Paranet,
        ual: &Ual,
        state: &str,
    ) -> Result<Assertion, SyncError> {
        let blockchain = paranet.blockchain.as_str();
        let id = self
            .service
            .start_get(blockchain, ual, state, FetchMode::Local, None)?;
        if let Some(OperationResult::Found { assertion }) = self.settle(&id).await? {
            return Ok(assertion);
        }

        info!(operation_id = %id, ual = %ual, policy = %paranet.access_policy, "local GET missed, trying network");
        let (mode, routing) = match paranet.access_policy {
            AccessPolicy::Open => (FetchMode::Network, None),
            AccessPolicy::Curated => (
                FetchMode::CuratedNetwork,
                Some(GetRouting {
                    paranet_ual: Some(paranet.ual.clone()),
                    ..GetRouting::default()
                }),
            ),
        };
        self.service
            .enqueue_get(id, blockchain, ual, state, mode, routing)?;
        match self.settle(&id).await? {
            Some(OperationResult::Found { assertion }) => Ok(assertion),
            Some(other) => {
                debug!(operation_id = %id, result = ?other, "network GET returned no content");
                Err(SyncError::NotFound {
                    ual: ual.to_string(),
                    state: state.to_string(),
                })
            }
            None => Err(SyncError::NotFound {
                ual: ual.to_string(),
                state: state.to_string(),
            }),
        }
    }
}

/// Replicates every historical state of a collection, oldest first, into
/// the paranet's partition. Stops at the first state that cannot be
/// fetched; later states are not attempted.
pub struct CollectionSyncer {
    chain: Arc<dyn Blockchain>,
    fetcher: Arc<dyn StateFetcher>,
    store: Arc<dyn TripleStore>,
}

impl CollectionSyncer {
    pub fn new(
        chain: Arc<dyn Blockchain>,
        fetcher: Arc<dyn StateFetcher>,
        store: Arc<dyn TripleStore>,
    ) -> Self {
        Self {
            chain,
            fetcher,
            store,
        }
    }

    /// Returns the number of states written.
    pub async fn sync(&self, paranet: &Paranet, ual: &Ual) -> Result<usize, SyncError> {
        let roots = self
            .chain
            .collection_merkle_roots(ual.blockchain(), ual.contract(), ual.token_id())
            .await?;
        let partition = StoragePartition::Paranet(paranet.ual.clone());

        for (index, root) in roots.iter().enumerate() {
            debug!(
                ual = %ual,
                state = %root,
                index = index + 1,
                total = roots.len(),
                "fetching state"
            );
            let assertion = self
                .fetcher
                .fetch_state(paranet, ual, root)
                .await
                .map_err(|e| SyncError::StateSync {
                    ual: ual.to_string(),
                    state_index: index,
                    reason: e.to_string(),
                })?;
            self.store.insert(&partition, ual, root, &assertion).await?;
            debug!(ual = %ual, state = %root, triples = assertion.len(), "state stored");
        }
        Ok(roots.len())
    }
}
