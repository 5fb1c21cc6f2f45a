use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use trellis_chain::memory::MemoryChain;
use trellis_chain::traits::Blockchain;
use trellis_command::cleanup::CommandsCleanupHandler;
use trellis_command::error::CommandError;
use trellis_command::executor::CommandExecutor;
use trellis_command::registry::HandlerRegistry;
use trellis_command::scheduler::Scheduler;
use trellis_paranet::command::{
    paranet_sync_command, ParanetSyncCommand, ParanetSyncRequest, SyncStats,
};
use trellis_paranet::discover::MembershipDiscovery;
use trellis_paranet::state_sync::{CollectionSyncer, CommandStateFetcher};
use trellis_protocol::commands::protocol_handlers;
use trellis_protocol::coordinator::OperationCoordinator;
use trellis_protocol::network::PeerNetwork;
use trellis_protocol::service::OperationService;
use trellis_protocol::sim::SimNetwork;
use trellis_storage::knowledge::{MemoryTripleStore, TripleStore};
use trellis_storage::memory::MemoryRepository;
use trellis_storage::sqlite::SqliteRepository;
use trellis_storage::traits::{CommandRepository, OperationRepository, ParanetKcRepository};
use trellis_types::command::{Command, CommandData, CommandName, CommandStatus};
use trellis_types::operation::OperationId;
use trellis_types::primitives::now_millis;
use trellis_types::ual::Ual;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::NodeMetrics;

/// External systems the node talks to.
pub struct Collaborators {
    pub chain: Arc<dyn Blockchain>,
    pub network: Arc<dyn PeerNetwork>,
}

impl Collaborators {
    /// An empty chain and a network with no peers.
    pub fn detached() -> Self {
        Self {
            chain: Arc::new(MemoryChain::new()),
            network: Arc::new(SimNetwork::new()),
        }
    }
}

/// One backend seen through each repository contract.
struct Repositories {
    commands: Arc<dyn CommandRepository>,
    operations: Arc<dyn OperationRepository>,
    kcs: Arc<dyn ParanetKcRepository>,
}

impl Repositories {
    fn from_backend<R>(backend: Arc<R>) -> Self
    where
        R: CommandRepository + OperationRepository + ParanetKcRepository + 'static,
    {
        Self {
            commands: backend.clone(),
            operations: backend.clone(),
            kcs: backend,
        }
    }
}

/// Create a storage backend from the node configuration.
fn create_repositories(config: &NodeConfig) -> Result<Repositories, NodeError> {
    match config.storage.db_type.as_str() {
        "memory" => Ok(Repositories::from_backend(Arc::new(MemoryRepository::new()))),
        "sqlite" => {
            let data_dir = std::path::Path::new(&config.storage.data_dir);
            std::fs::create_dir_all(data_dir)?;
            let db_path = data_dir.join("trellis.db");
            let repo = SqliteRepository::new(db_path.to_str().unwrap_or("trellis.db"))
                .map_err(NodeError::StorageError)?;
            Ok(Repositories::from_backend(Arc::new(repo)))
        }
        other => Err(NodeError::ConfigError {
            reason: format!(
                "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                other
            ),
        }),
    }
}

/// The main node that ties the command pipeline together.
pub struct Node {
    config: NodeConfig,
    scheduler: Scheduler,
    executor: Arc<CommandExecutor>,
    coordinator: Arc<OperationCoordinator>,
    service: OperationService,
    store: Arc<dyn TripleStore>,
    kcs: Arc<dyn ParanetKcRepository>,
    sync_stats: Arc<SyncStats>,
    metrics: Arc<NodeMetrics>,
}

impl Node {
    /// Create a new node from the given configuration.
    pub fn new(config: NodeConfig, collaborators: Collaborators) -> Result<Self, NodeError> {
        config.validate()?;
        let repos = create_repositories(&config)?;
        let store: Arc<dyn TripleStore> = Arc::new(MemoryTripleStore::new());
        let scheduler = Scheduler::new(repos.commands.clone());
        let service = OperationService::new(scheduler.clone(), repos.operations.clone());

        let coordinator = Arc::new(OperationCoordinator::new(
            collaborators.network.clone(),
            repos.operations.clone(),
            store.clone(),
            config.protocol.peer_timeout(),
        ));

        let mut registry = HandlerRegistry::new();
        for handler in protocol_handlers(
            &config.protocol,
            collaborators.chain.clone(),
            collaborators.network.clone(),
            repos.operations.clone(),
            store.clone(),
            coordinator.clone(),
        ) {
            registry.register(handler);
        }

        let fetcher = Arc::new(CommandStateFetcher::new(
            service.clone(),
            config.paranet.poll_attempts,
            config.paranet.poll_interval(),
        ));
        let paranet_sync = ParanetSyncCommand::new(
            MembershipDiscovery::new(
                collaborators.chain.clone(),
                repos.kcs.clone(),
                config.paranet.page_size,
            ),
            CollectionSyncer::new(collaborators.chain.clone(), fetcher, store.clone()),
            repos.kcs.clone(),
            repos.operations.clone(),
            config.paranet.clone(),
        );
        let sync_stats = paranet_sync.stats();
        registry.register(Arc::new(paranet_sync));
        registry.register(Arc::new(CommandsCleanupHandler::new(
            repos.commands.clone(),
            config.executor.command_ttl(),
        )));

        let executor = Arc::new(CommandExecutor::new(
            scheduler.clone(),
            registry,
            config.executor.executor_config(),
        ));

        Ok(Self {
            config,
            scheduler,
            executor,
            coordinator,
            service,
            store,
            kcs: repos.kcs,
            sync_stats,
            metrics: Arc::new(NodeMetrics::new()),
        })
    }

    /// Enqueue the recurring jobs: one sync command per configured paranet
    /// and the command cleanup. Jobs already queued by a previous run of a
    /// persistent backend are kept as they are. Returns how many were added.
    pub fn schedule_jobs(&self) -> Result<usize, NodeError> {
        let repo = self.scheduler.repository();
        let mut queued = Vec::new();
        for status in [
            CommandStatus::Pending,
            CommandStatus::Running,
            CommandStatus::Repeating,
        ] {
            queued.extend(repo.commands_with_status(status)?);
        }

        let synced_paranets: HashSet<Ual> = queued
            .iter()
            .filter(|c| c.name == CommandName::ParanetSync)
            .filter_map(|c| c.data.decode::<ParanetSyncRequest>().ok())
            .map(|r| r.paranet.ual)
            .collect();

        let mut added = 0;
        for paranet in &self.config.paranet.paranets {
            if synced_paranets.contains(&paranet.ual) {
                tracing::debug!(paranet = %paranet.ual, "paranet sync already scheduled");
                continue;
            }
            let command = paranet_sync_command(
                paranet,
                OperationId::new(),
                self.config.paranet.sync_frequency_ms,
            )?;
            self.scheduler.add_command(command)?;
            tracing::info!(
                paranet = %paranet.ual,
                policy = %paranet.access_policy,
                period_ms = self.config.paranet.sync_frequency_ms,
                "paranet sync scheduled"
            );
            added += 1;
        }

        if !queued.iter().any(|c| c.name == CommandName::CommandsCleanup) {
            self.scheduler.add_command(Command::new(
                CommandName::CommandsCleanup,
                CommandData::new(),
                now_millis(),
            ))?;
            added += 1;
        }
        Ok(added)
    }

    /// Run until `shutdown` flips to true, then wait for running commands.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
        let added = self.schedule_jobs()?;
        tracing::info!(
            jobs_added = added,
            paranets = self.config.paranet.paranets.len(),
            storage = %self.config.storage.db_type,
            "Node is running. Press Ctrl+C to stop."
        );

        let executor = tokio::spawn(self.executor.clone().run(shutdown.clone()));
        let mut refresh = tokio::time::interval(Duration::from_millis(
            self.config.metrics.refresh_interval_ms.max(1),
        ));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = refresh.tick() => self.refresh_metrics(),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Shutting down node...");
        executor
            .await
            .map_err(|e| CommandError::handler(format!("executor task failed: {}", e)))??;
        self.refresh_metrics();
        tracing::info!(
            rows_synced = self.sync_stats.synced(),
            rows_failed = self.sync_stats.failed(),
            operations_completed = self.coordinator.stats().completed(),
            "Node shutdown complete"
        );
        Ok(())
    }

    /// Run until Ctrl+C.
    pub async fn run_until_ctrl_c(&self) -> Result<(), NodeError> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            let _ = tx.send(true);
        });
        self.run(rx).await
    }

    /// Copy component totals into the registry and, if configured, write
    /// the text exposition file.
    pub fn refresh_metrics(&self) {
        self.metrics.observe(
            &self.executor.stats(),
            self.coordinator.stats(),
            &self.sync_stats,
            self.coordinator.open_tallies(),
        );
        if let Some(ref path) = self.config.metrics.textfile_path {
            if let Err(e) = std::fs::write(path, self.metrics.encode()) {
                tracing::warn!(path = %path, "Failed to write metrics file: {}", e);
            }
        }
    }

    /// Entry point for starting GET, publish and update operations.
    pub fn service(&self) -> &OperationService {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn TripleStore> {
        &self.store
    }

    pub fn paranet_records(&self) -> &Arc<dyn ParanetKcRepository> {
        &self.kcs
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }
}
