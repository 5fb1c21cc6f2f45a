use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use trellis_chain::traits::Blockchain;
use trellis_command::error::CommandError;
use trellis_command::handler::{continue_sequence, CommandHandler, CommandOutcome};
use trellis_storage::knowledge::TripleStore;
use trellis_storage::traits::OperationRepository;
use trellis_types::command::{Command, CommandData, CommandName};
use trellis_types::operation::{OperationResult, OperationStatus};
use trellis_types::paranet::StoragePartition;
use trellis_types::primitives::now_millis;

use crate::coordinator::OperationCoordinator;
use crate::network::PeerNetwork;
use crate::request::{NetworkRequest, ScheduleRequest};
use crate::strategy::{
    CuratedGetStrategy, GetStrategy, PeerScope, ProtocolConfig, ProtocolStrategy,
    PublishStrategy, UpdateStrategy,
};

/// Every protocol command handler, wired to shared collaborators.
pub fn protocol_handlers(
    config: &ProtocolConfig,
    chain: Arc<dyn Blockchain>,
    network: Arc<dyn PeerNetwork>,
    operations: Arc<dyn OperationRepository>,
    store: Arc<dyn TripleStore>,
    coordinator: Arc<OperationCoordinator>,
) -> Vec<Arc<dyn CommandHandler>> {
    let strategies: Vec<Arc<dyn ProtocolStrategy>> = vec![
        Arc::new(GetStrategy::new(config)),
        Arc::new(CuratedGetStrategy::new(config)),
        Arc::new(PublishStrategy::new(chain.clone(), config)),
        Arc::new(UpdateStrategy::new(chain, config)),
    ];
    let mut handlers: Vec<Arc<dyn CommandHandler>> = strategies
        .into_iter()
        .map(|strategy| {
            Arc::new(ProtocolCommand::new(
                strategy,
                network.clone(),
                operations.clone(),
            )) as Arc<dyn CommandHandler>
        })
        .collect();
    handlers.push(Arc::new(ScheduleMessagesCommand::new(
        coordinator,
        operations.clone(),
    )));
    handlers.push(Arc::new(LocalGetCommand::new(store.clone(), operations.clone())));
    handlers.push(Arc::new(StoreAssertionCommand::new(store, operations)));
    handlers
}

/// Leave the operation a command was working on FAILED. Never fails itself.
fn fail_operation(operations: &dyn OperationRepository, command: &Command, cause: &CommandError) {
    let Some(id) = command.data.operation_id() else {
        warn!(command = %command.name, "failed command carries no operation id");
        return;
    };
    let result = OperationResult::Error {
        message: cause.to_string(),
    };
    match operations.finish_operation(&id, OperationStatus::Failed, &result, now_millis()) {
        Ok(true) => warn!(operation_id = %id, command = %command.name, error = %cause, "operation failed"),
        Ok(false) => debug!(operation_id = %id, command = %command.name, error = %cause, "operation already settled, keeping its result"),
        Err(e) => error!(operation_id = %id, error = %e, "could not record operation failure"),
    }
}

/// First stage of a network operation: resolves the fan-out parameters and
/// candidate peers, then emits one `scheduleMessagesCommand` per keyword.
pub struct ProtocolCommand {
    strategy: Arc<dyn ProtocolStrategy>,
    network: Arc<dyn PeerNetwork>,
    operations: Arc<dyn OperationRepository>,
}

impl ProtocolCommand {
    pub fn new(
        strategy: Arc<dyn ProtocolStrategy>,
        network: Arc<dyn PeerNetwork>,
        operations: Arc<dyn OperationRepository>,
    ) -> Self {
        Self {
            strategy,
            network,
            operations,
        }
    }
}

#[async_trait]
impl CommandHandler for ProtocolCommand {
    fn name(&self) -> CommandName {
        self.strategy.command_name()
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let request: NetworkRequest = command.data.decode()?;
        let kind = self.strategy.operation_kind();
        if request.request.kind() != kind {
            return Err(CommandError::validation(format!(
                "{} cannot carry a {} request",
                command.name,
                request.request.kind()
            )));
        }

        let id = request.operation_id;
        let blockchain = request.blockchain.as_str();
        self.operations
            .update_operation_status(&id, OperationStatus::NetworkProtocolStart, now_millis())?;

        let batch_size = self.strategy.batch_size(blockchain).await?;
        let min_ack_responses = self.strategy.min_ack_responses(blockchain).await?;
        self.operations
            .update_operation_status(&id, OperationStatus::BatchSizeResolved, now_millis())?;

        let mut follow_ups = Vec::new();
        for keyword in self.strategy.keywords(&request) {
            let nodes = match self.strategy.peer_scope(&keyword, &request)? {
                PeerScope::Shard(shard_key) => {
                    self.network.find_shard_peers(blockchain, &shard_key).await?
                }
                PeerScope::Paranet(paranet_ual) => {
                    self.network.paranet_peers(blockchain, &paranet_ual).await?
                }
            };
            if nodes.is_empty() {
                warn!(operation_id = %id, keyword = %keyword, "no peers found");
            }
            debug!(
                operation_id = %id,
                keyword = %keyword,
                peers = nodes.len(),
                batch_size,
                min_ack_responses,
                "peers resolved"
            );
            let schedule = ScheduleRequest {
                operation_id: id,
                blockchain: request.blockchain.clone(),
                kind,
                keyword,
                batch_size,
                min_ack_responses,
                nodes,
                request: request.request.clone(),
                routing: request.routing.clone(),
            };
            follow_ups.push(Command::new(
                CommandName::ScheduleMessages,
                CommandData::encode(&schedule)?,
                now_millis(),
            ));
        }
        Ok(CommandOutcome::Continue(follow_ups))
    }

    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        fail_operation(self.operations.as_ref(), command, error);
        CommandOutcome::Empty
    }
}

/// Opens the tally for one keyword and sends the first round.
pub struct ScheduleMessagesCommand {
    coordinator: Arc<OperationCoordinator>,
    operations: Arc<dyn OperationRepository>,
}

impl ScheduleMessagesCommand {
    pub fn new(
        coordinator: Arc<OperationCoordinator>,
        operations: Arc<dyn OperationRepository>,
    ) -> Self {
        Self {
            coordinator,
            operations,
        }
    }
}

#[async_trait]
impl CommandHandler for ScheduleMessagesCommand {
    fn name(&self) -> CommandName {
        CommandName::ScheduleMessages
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let request: ScheduleRequest = command.data.decode()?;
        self.coordinator.open(request).await?;
        Ok(CommandOutcome::Empty)
    }

    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        fail_operation(self.operations.as_ref(), command, error);
        CommandOutcome::Empty
    }
}

/// Serves a GET from the node's own storage.
pub struct LocalGetCommand {
    store: Arc<dyn TripleStore>,
    operations: Arc<dyn OperationRepository>,
}

impl LocalGetCommand {
    pub fn new(store: Arc<dyn TripleStore>, operations: Arc<dyn OperationRepository>) -> Self {
        Self { store, operations }
    }
}

#[async_trait]
impl CommandHandler for LocalGetCommand {
    fn name(&self) -> CommandName {
        CommandName::LocalGet
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let request: NetworkRequest = command.data.decode()?;
        let id = request.operation_id;
        let ual = request.request.ual();
        let state = request.request.state();
        self.operations
            .update_operation_status(&id, OperationStatus::LocalGetStart, now_millis())?;

        match self.store.local_fetch(ual, state).await? {
            Some(assertion) => {
                self.operations
                    .update_operation_status(&id, OperationStatus::LocalGetEnd, now_millis())?;
                let result = OperationResult::Found { assertion };
                self.operations
                    .finish_operation(&id, OperationStatus::Completed, &result, now_millis())?;
                info!(operation_id = %id, ual = %ual, "served from local storage");
            }
            None => {
                let result = OperationResult::Error {
                    message: format!("state {} of {} not held locally", state, ual),
                };
                self.operations
                    .finish_operation(&id, OperationStatus::Failed, &result, now_millis())?;
                debug!(operation_id = %id, ual = %ual, "local miss");
            }
        }
        Ok(CommandOutcome::Empty)
    }

    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        fail_operation(self.operations.as_ref(), command, error);
        CommandOutcome::Empty
    }
}

/// Persists a published or updated assertion locally before replication.
/// Runs as a transactional command, so a failed insert is never retried.
pub struct StoreAssertionCommand {
    store: Arc<dyn TripleStore>,
    operations: Arc<dyn OperationRepository>,
}

impl StoreAssertionCommand {
    pub fn new(store: Arc<dyn TripleStore>, operations: Arc<dyn OperationRepository>) -> Self {
        Self { store, operations }
    }
}

#[async_trait]
impl CommandHandler for StoreAssertionCommand {
    fn name(&self) -> CommandName {
        CommandName::StoreAssertion
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let request: NetworkRequest = command.data.decode()?;
        let Some(assertion) = request.request.assertion() else {
            return Err(CommandError::validation(
                "only publish and update requests carry an assertion",
            ));
        };
        let ual = request.request.ual();
        self.store
            .insert(&StoragePartition::Dkg, ual, request.request.state(), assertion)
            .await?;
        debug!(
            operation_id = %request.operation_id,
            ual = %ual,
            triples = assertion.len(),
            "assertion stored"
        );
        Ok(continue_sequence(command, &CommandData::new()))
    }

    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        fail_operation(self.operations.as_ref(), command, error);
        CommandOutcome::Empty
    }
}
