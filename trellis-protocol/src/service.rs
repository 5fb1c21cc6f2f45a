use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use trellis_command::scheduler::Scheduler;
use trellis_storage::traits::OperationRepository;
use trellis_types::command::{Command, CommandData, CommandName};
use trellis_types::operation::{
    Assertion, Operation, OperationId, OperationKind, OperationResult, OperationStatus,
};
use trellis_types::primitives::now_millis;
use trellis_types::ual::Ual;

use crate::error::ProtocolError;
use crate::network::ProtocolRequest;
use crate::request::{GetRouting, NetworkRequest};

/// Where a GET looks for content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// The node's own storage only.
    Local,
    /// Any shard node.
    Network,
    /// A curated paranet's permissioned nodes.
    CuratedNetwork,
}

impl FetchMode {
    fn command_name(self) -> CommandName {
        match self {
            FetchMode::Local => CommandName::LocalGet,
            FetchMode::Network => CommandName::NetworkGet,
            FetchMode::CuratedNetwork => CommandName::CuratedParanetNetworkGet,
        }
    }
}

/// Entry point for starting operations and polling their outcome.
#[derive(Clone)]
pub struct OperationService {
    scheduler: Scheduler,
    operations: Arc<dyn OperationRepository>,
}

impl OperationService {
    pub fn new(scheduler: Scheduler, operations: Arc<dyn OperationRepository>) -> Self {
        Self {
            scheduler,
            operations,
        }
    }

    /// Create a GET operation and enqueue its first command.
    pub fn start_get(
        &self,
        blockchain: &str,
        ual: &Ual,
        state: &str,
        mode: FetchMode,
        routing: Option<GetRouting>,
    ) -> Result<OperationId, ProtocolError> {
        let id = self.create(OperationKind::Get, blockchain)?;
        self.schedule_get(id, blockchain, ual, state, mode, routing)?;
        Ok(id)
    }

    /// Run another GET attempt under an existing operation id, e.g. a
    /// network fetch after a local miss. The previous outcome is dropped.
    pub fn enqueue_get(
        &self,
        id: OperationId,
        blockchain: &str,
        ual: &Ual,
        state: &str,
        mode: FetchMode,
        routing: Option<GetRouting>,
    ) -> Result<(), ProtocolError> {
        if !self
            .operations
            .restart_operation(&id, OperationStatus::Pending, now_millis())?
        {
            return Err(ProtocolError::InvalidRequest {
                reason: format!("unknown operation {}", id),
            });
        }
        self.schedule_get(id, blockchain, ual, state, mode, routing)
    }

    /// Store the assertion locally, then replicate it to the shard.
    pub fn start_publish(
        &self,
        blockchain: &str,
        ual: &Ual,
        state: &str,
        assertion: Assertion,
    ) -> Result<OperationId, ProtocolError> {
        let id = self.create(OperationKind::Publish, blockchain)?;
        let request = ProtocolRequest::Publish {
            ual: ual.clone(),
            state: state.to_string(),
            assertion,
        };
        self.schedule_replication(id, blockchain, request, CommandName::NetworkPublish)?;
        Ok(id)
    }

    /// Store a new state of an existing collection, then replicate it.
    pub fn start_update(
        &self,
        blockchain: &str,
        ual: &Ual,
        state: &str,
        assertion: Assertion,
    ) -> Result<OperationId, ProtocolError> {
        let id = self.create(OperationKind::Update, blockchain)?;
        let request = ProtocolRequest::Update {
            ual: ual.clone(),
            state: state.to_string(),
            assertion,
        };
        self.schedule_replication(id, blockchain, request, CommandName::NetworkUpdate)?;
        Ok(id)
    }

    pub fn status(&self, id: &OperationId) -> Result<Option<OperationStatus>, ProtocolError> {
        Ok(self.operations.get_operation(id)?.map(|op| op.status))
    }

    pub fn result(&self, id: &OperationId) -> Result<Option<OperationResult>, ProtocolError> {
        Ok(self.operations.cached_operation_result(id)?)
    }

    /// Poll until the operation is terminal: sleep `interval`, check, at
    /// most `attempts` times. Returns `None` if it never finished.
    pub async fn await_terminal(
        &self,
        id: &OperationId,
        attempts: u32,
        interval: Duration,
    ) -> Result<Option<Operation>, ProtocolError> {
        for attempt in 1..=attempts {
            tokio::time::sleep(interval).await;
            if let Some(op) = self.operations.get_operation(id)? {
                if op.status.is_terminal() {
                    debug!(operation_id = %id, attempt, status = %op.status, "operation settled");
                    return Ok(Some(op));
                }
            }
        }
        Ok(None)
    }

    fn create(&self, kind: OperationKind, blockchain: &str) -> Result<OperationId, ProtocolError> {
        let id = OperationId::new();
        self.operations
            .create_operation(&Operation::new(id, kind, blockchain, now_millis()))?;
        Ok(id)
    }

    fn schedule_get(
        &self,
        id: OperationId,
        blockchain: &str,
        ual: &Ual,
        state: &str,
        mode: FetchMode,
        routing: Option<GetRouting>,
    ) -> Result<(), ProtocolError> {
        let request = NetworkRequest {
            operation_id: id,
            blockchain: blockchain.to_string(),
            request: ProtocolRequest::Get {
                ual: ual.clone(),
                state: state.to_string(),
            },
            routing,
        };
        self.scheduler
            .add(mode.command_name(), CommandData::encode(&request)?)?;
        debug!(operation_id = %id, ual = %ual, mode = ?mode, "get scheduled");
        Ok(())
    }

    fn schedule_replication(
        &self,
        id: OperationId,
        blockchain: &str,
        request: ProtocolRequest,
        network_stage: CommandName,
    ) -> Result<(), ProtocolError> {
        let ual = request.ual().clone();
        let request = NetworkRequest {
            operation_id: id,
            blockchain: blockchain.to_string(),
            request,
            routing: None,
        };
        let command = Command::new(
            CommandName::StoreAssertion,
            CommandData::encode(&request)?,
            now_millis(),
        )
        .with_sequence(vec![network_stage]);
        self.scheduler.add_command(command)?;
        info!(operation_id = %id, ual = %ual, stage = %network_stage, "replication scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::protocol_handlers;
    use crate::coordinator::OperationCoordinator;
    use crate::sim::SimNetwork;
    use crate::strategy::ProtocolConfig;
    use trellis_chain::memory::MemoryChain;
    use trellis_command::executor::{CommandExecutor, ExecutorConfig};
    use trellis_command::registry::HandlerRegistry;
    use trellis_storage::knowledge::{MemoryTripleStore, TripleStore};
    use trellis_storage::memory::MemoryRepository;
    use trellis_types::constants::NOT_FOUND_MESSAGE;
    use trellis_types::paranet::StoragePartition;

    const BC: &str = "otp:2043";

    struct Node {
        net: Arc<SimNetwork>,
        store: Arc<MemoryTripleStore>,
        executor: Arc<CommandExecutor>,
        service: OperationService,
    }

    fn node(peers: usize) -> Node {
        let repo = Arc::new(MemoryRepository::new());
        let net = Arc::new(SimNetwork::with_peers(peers));
        let store = Arc::new(MemoryTripleStore::new());
        let chain = Arc::new(MemoryChain::new());
        let config = ProtocolConfig {
            get_batch_size: 4,
            get_min_ack_responses: 2,
            publish_batch_size: 4,
            publish_min_ack_responses: 2,
            ..ProtocolConfig::default()
        };
        let coordinator = Arc::new(OperationCoordinator::new(
            net.clone(),
            repo.clone(),
            store.clone(),
            config.peer_timeout(),
        ));
        let mut registry = HandlerRegistry::new();
        for handler in protocol_handlers(
            &config,
            chain,
            net.clone(),
            repo.clone(),
            store.clone(),
            coordinator,
        ) {
            registry.register(handler);
        }
        let scheduler = Scheduler::new(repo.clone());
        let executor = Arc::new(CommandExecutor::new(
            scheduler.clone(),
            registry,
            ExecutorConfig::default(),
        ));
        Node {
            net,
            store,
            executor,
            service: OperationService::new(scheduler, repo),
        }
    }

    fn asset() -> Ual {
        Ual::derive(BC, "0xkc", 7)
    }

    fn content() -> Assertion {
        Assertion::new(vec!["<s> <p> <o> .".to_string()])
    }

    async fn finish(node: &Node, id: &OperationId) -> Operation {
        node.executor.drain().await.unwrap();
        node.service
            .await_terminal(id, 500, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("operation should finish")
    }

    #[tokio::test]
    async fn test_network_get_end_to_end() {
        let node = node(10);
        node.net.serve("peer-01", &asset(), "0xroot", content());
        node.net.serve("peer-03", &asset(), "0xroot", content());

        let id = node
            .service
            .start_get(BC, &asset(), "0xroot", FetchMode::Network, None)
            .unwrap();
        let op = finish(&node, &id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(
            node.service.result(&id).unwrap(),
            Some(OperationResult::Found {
                assertion: content()
            })
        );
        assert_eq!(node.net.contacted().len(), 4);
    }

    #[tokio::test]
    async fn test_network_get_not_found_is_completed() {
        let node = node(10);
        let id = node
            .service
            .start_get(BC, &asset(), "0xroot", FetchMode::Network, None)
            .unwrap();
        let op = finish(&node, &id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(
            node.service.result(&id).unwrap(),
            Some(OperationResult::NotFound {
                message: NOT_FOUND_MESSAGE.to_string()
            })
        );
        assert_eq!(node.net.contacted().len(), 10);
    }

    #[tokio::test]
    async fn test_local_miss_then_network_retry_same_id() {
        let node = node(3);
        node.net.serve_everywhere(&asset(), "0xroot", &content());

        let id = node
            .service
            .start_get(BC, &asset(), "0xroot", FetchMode::Local, None)
            .unwrap();
        let op = finish(&node, &id).await;
        assert_eq!(op.status, OperationStatus::Failed);

        node.service
            .enqueue_get(id, BC, &asset(), "0xroot", FetchMode::Network, None)
            .unwrap();
        assert_eq!(node.service.status(&id).unwrap(), Some(OperationStatus::Pending));
        assert_eq!(node.service.result(&id).unwrap(), None);
        let op = finish(&node, &id).await;
        assert_eq!(op.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn test_enqueue_get_unknown_operation() {
        let node = node(1);
        let err = node
            .service
            .enqueue_get(OperationId::new(), BC, &asset(), "0xroot", FetchMode::Network, None)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_publish_stores_then_replicates() {
        let node = node(5);
        let id = node
            .service
            .start_publish(BC, &asset(), "0xroot", content())
            .unwrap();
        let op = finish(&node, &id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(
            node.service.result(&id).unwrap(),
            Some(OperationResult::Acknowledged { acks: 2 })
        );
        assert_eq!(
            node.store
                .get(&StoragePartition::Dkg, &asset(), "0xroot")
                .await
                .unwrap(),
            Some(content())
        );
        assert!(node.net.contacted().len() >= 2);
    }

    #[tokio::test]
    async fn test_update_replicates_new_state() {
        let node = node(4);
        let id = node
            .service
            .start_update(BC, &asset(), "0xroot-2", content())
            .unwrap();
        let op = finish(&node, &id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        let holders = (0..4)
            .filter(|i| node.net.holds(&SimNetwork::peer_name(*i), &asset(), "0xroot-2"))
            .count();
        assert!(holders >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_terminal_is_bounded() {
        let node = node(1);
        let id = node
            .service
            .start_get(BC, &asset(), "0xroot", FetchMode::Network, None)
            .unwrap();
        // executor never runs, so the operation stays pending
        let started = tokio::time::Instant::now();
        let outcome = node
            .service
            .await_terminal(&id, 5, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
