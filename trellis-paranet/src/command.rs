use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use trellis_command::error::CommandError;
use trellis_command::handler::{CommandHandler, CommandOutcome};
use trellis_storage::traits::{OperationRepository, ParanetKcRepository};
use trellis_types::command::{Command, CommandData, CommandName};
use trellis_types::operation::{
    Operation, OperationId, OperationKind, OperationResult, OperationStatus,
};
use trellis_types::paranet::{Paranet, ParanetSyncRecord};
use trellis_types::primitives::now_millis;

use crate::config::ParanetSyncConfig;
use crate::discover::MembershipDiscovery;
use crate::error::SyncError;
use crate::state_sync::CollectionSyncer;

/// Payload of `paranetSyncCommand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParanetSyncRequest {
    /// Operation that records each run's batch summary.
    pub operation_id: OperationId,
    pub paranet: Paranet,
}

/// Build the recurring sync command for one paranet.
pub fn paranet_sync_command(
    paranet: &Paranet,
    operation_id: OperationId,
    period_ms: u64,
) -> Result<Command, SyncError> {
    let request = ParanetSyncRequest {
        operation_id,
        paranet: paranet.clone(),
    };
    Ok(
        Command::new(CommandName::ParanetSync, CommandData::encode(&request)?, now_millis())
            .with_period(period_ms),
    )
}

/// Synced and failed row counts since startup.
#[derive(Debug, Default)]
pub struct SyncStats {
    synced: AtomicU64,
    failed: AtomicU64,
}

impl SyncStats {
    pub fn synced(&self) -> u64 {
        self.synced.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Recurring paranet reconciler. Each command's payload names the paranet
/// it syncs.
///
/// A run never stops the schedule: every outcome, including failures,
/// re-arms the command for its next period.
pub struct ParanetSyncCommand {
    discovery: MembershipDiscovery,
    syncer: CollectionSyncer,
    kcs: Arc<dyn ParanetKcRepository>,
    operations: Arc<dyn OperationRepository>,
    config: ParanetSyncConfig,
    stats: Arc<SyncStats>,
}

impl ParanetSyncCommand {
    pub fn new(
        discovery: MembershipDiscovery,
        syncer: CollectionSyncer,
        kcs: Arc<dyn ParanetKcRepository>,
        operations: Arc<dyn OperationRepository>,
        config: ParanetSyncConfig,
    ) -> Self {
        Self {
            discovery,
            syncer,
            kcs,
            operations,
            config,
            stats: Arc::new(SyncStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SyncStats> {
        self.stats.clone()
    }

    /// Mark the run's operation as started, creating it on first use.
    fn begin_run(&self, request: &ParanetSyncRequest) -> Result<(), SyncError> {
        let id = request.operation_id;
        let now = now_millis();
        if !self
            .operations
            .restart_operation(&id, OperationStatus::ParanetSyncStart, now)?
        {
            let op = Operation::new(id, OperationKind::ParanetSync, &request.paranet.blockchain, now)
                .with_status(OperationStatus::ParanetSyncStart);
            self.operations.create_operation(&op)?;
        }
        Ok(())
    }

    fn end_run(&self, id: &OperationId, synced: u32, failed: u32) -> Result<(), SyncError> {
        let result = OperationResult::SyncSummary { synced, failed };
        self.operations
            .finish_operation(id, OperationStatus::Completed, &result, now_millis())?;
        Ok(())
    }

    /// Sync one row. Failures are recorded on the row, never propagated.
    async fn sync_row(&self, paranet: &Paranet, row: &ParanetSyncRecord) -> bool {
        match self.syncer.sync(paranet, &row.ual).await {
            Ok(states) => {
                info!(paranet = %paranet.ual, ual = %row.ual, states, "collection synced");
                if let Err(e) = self
                    .kcs
                    .paranet_kc_mark_synced(&paranet.ual, &row.ual, now_millis())
                {
                    error!(ual = %row.ual, error = %e, "could not mark collection synced");
                    return false;
                }
                true
            }
            Err(e) => {
                warn!(
                    paranet = %paranet.ual,
                    ual = %row.ual,
                    retries = row.retries,
                    error = %e,
                    "collection sync failed"
                );
                if let Err(e) = self.kcs.paranet_kc_increment_retries(
                    &paranet.ual,
                    &row.ual,
                    &e.to_string(),
                    now_millis(),
                ) {
                    error!(ual = %row.ual, error = %e, "could not record sync failure");
                }
                false
            }
        }
    }

    async fn run(&self, request: &ParanetSyncRequest) -> Result<(u32, u32), SyncError> {
        let paranet = &request.paranet;
        let id = request.operation_id;
        info!(
            operation_id = %id,
            paranet = %paranet.ual,
            paranet_id = %paranet.id,
            policy = %paranet.access_policy,
            "starting paranet sync"
        );
        self.begin_run(request)?;

        let report = self.discovery.discover(paranet).await?;
        let synced = self.kcs.paranet_kc_synced_count(&paranet.ual)?;
        let unsynced = self.kcs.paranet_kc_unsynced_count(&paranet.ual)?;
        info!(
            paranet = %paranet.ual,
            on_chain = report.on_chain,
            synced,
            unsynced,
            "paranet membership"
        );
        if unsynced == 0 {
            self.end_run(&id, 0, 0)?;
            return Ok((0, 0));
        }

        let batch = self.kcs.paranet_kc_sync_batch(
            &paranet.ual,
            self.config.retries_limit,
            self.config.retry_delay_ms,
            self.config.batch_size,
            now_millis(),
        )?;
        info!(paranet = %paranet.ual, batch = batch.len(), "syncing missed collections");
        self.operations.update_operation_status(
            &id,
            OperationStatus::ParanetSyncMissedStart,
            now_millis(),
        )?;

        let outcomes = join_all(batch.iter().map(|row| self.sync_row(paranet, row))).await;
        let succeeded = outcomes.iter().filter(|ok| **ok).count() as u32;
        let failed = outcomes.len() as u32 - succeeded;
        self.stats
            .synced
            .fetch_add(succeeded as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(failed as u64, Ordering::Relaxed);

        self.operations.update_operation_status(
            &id,
            OperationStatus::ParanetSyncMissedEnd,
            now_millis(),
        )?;
        self.end_run(&id, succeeded, failed)?;
        info!(
            operation_id = %id,
            paranet = %paranet.ual,
            succeeded,
            failed,
            "paranet sync batch finished"
        );
        Ok((succeeded, failed))
    }
}

#[async_trait]
impl CommandHandler for ParanetSyncCommand {
    fn name(&self) -> CommandName {
        CommandName::ParanetSync
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let request: ParanetSyncRequest = command.data.decode()?;
        self.run(&request).await?;
        Ok(CommandOutcome::Repeat)
    }

    async fn recover(&self, command: &Command, error: &CommandError) -> CommandOutcome {
        warn!(
            command = %command.name,
            command_id = %command.id,
            error = %error,
            "paranet sync run failed, retrying next period"
        );
        CommandOutcome::Repeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use trellis_chain::memory::MemoryChain;
    use trellis_storage::knowledge::MemoryTripleStore;
    use trellis_storage::memory::MemoryRepository;
    use trellis_types::operation::Assertion;
    use trellis_types::paranet::{AccessPolicy, CollectionLocator, StoragePartition};
    use trellis_types::ual::Ual;

    use crate::state_sync::StateFetcher;

    const BC: &str = "otp:2043";
    const DELAY: u64 = 60_000;

    fn paranet() -> Paranet {
        Paranet {
            ual: Ual::derive(BC, "0xparanet", 1),
            id: "0xpid".to_string(),
            blockchain: BC.to_string(),
            access_policy: AccessPolicy::Open,
        }
    }

    fn kc(token: u64) -> Ual {
        Ual::derive(BC, "0xkc", token)
    }

    /// Serves every state except those listed; records what was asked.
    struct Fetcher {
        missing: HashSet<String>,
        asked: Mutex<Vec<(Ual, String)>>,
    }

    #[async_trait]
    impl StateFetcher for Fetcher {
        async fn fetch_state(
            &self,
            _paranet: &Paranet,
            ual: &Ual,
            state: &str,
        ) -> Result<Assertion, SyncError> {
            self.asked
                .lock()
                .unwrap()
                .push((ual.clone(), state.to_string()));
            if self.missing.contains(state) {
                return Err(SyncError::NotFound {
                    ual: ual.to_string(),
                    state: state.to_string(),
                });
            }
            Ok(Assertion::new(vec![state.to_string()]))
        }
    }

    struct Setup {
        chain: Arc<MemoryChain>,
        repo: Arc<MemoryRepository>,
        store: Arc<MemoryTripleStore>,
        fetcher: Arc<Fetcher>,
        handler: ParanetSyncCommand,
    }

    fn setup(members: u64, missing: &[&str]) -> Setup {
        let chain = Arc::new(MemoryChain::new());
        chain.add_paranet(BC, "0xpid");
        for token in 1..=members {
            chain.add_paranet_member(BC, "0xpid", CollectionLocator::new("0xkc", token));
            chain.set_merkle_roots(BC, "0xkc", token, vec![format!("root-{}-0", token)]);
        }
        let repo = Arc::new(MemoryRepository::new());
        let store = Arc::new(MemoryTripleStore::new());
        let fetcher = Arc::new(Fetcher {
            missing: missing.iter().map(|s| s.to_string()).collect(),
            asked: Mutex::new(Vec::new()),
        });
        let config = ParanetSyncConfig {
            retry_delay_ms: DELAY,
            ..ParanetSyncConfig::default()
        };
        let handler = ParanetSyncCommand::new(
            MembershipDiscovery::new(chain.clone(), repo.clone(), config.page_size),
            CollectionSyncer::new(chain.clone(), fetcher.clone(), store.clone()),
            repo.clone(),
            repo.clone(),
            config,
        );
        Setup {
            chain,
            repo,
            store,
            fetcher,
            handler,
        }
    }

    fn command(id: OperationId) -> Command {
        paranet_sync_command(&paranet(), id, 60_000).unwrap()
    }

    #[tokio::test]
    async fn test_run_syncs_new_members_and_repeats() {
        let s = setup(3, &[]);
        let id = OperationId::new();

        let outcome = s.handler.execute(&command(id)).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Repeat);
        assert_eq!(s.repo.paranet_kc_synced_count(&paranet().ual).unwrap(), 3);
        assert_eq!(
            s.repo.cached_operation_result(&id).unwrap(),
            Some(OperationResult::SyncSummary {
                synced: 3,
                failed: 0
            })
        );
        assert_eq!(
            s.store
                .state_count(&StoragePartition::Paranet(paranet().ual), &kc(2)),
            1
        );
        assert_eq!(s.handler.stats().synced(), 3);

        // nothing left: next run is a no-op summary on the same operation
        s.handler.execute(&command(id)).await.unwrap();
        assert_eq!(
            s.repo.cached_operation_result(&id).unwrap(),
            Some(OperationResult::SyncSummary {
                synced: 0,
                failed: 0
            })
        );
        assert_eq!(s.fetcher.asked.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let s = setup(3, &["root-2-0"]);
        let id = OperationId::new();

        s.handler.execute(&command(id)).await.unwrap();

        assert_eq!(
            s.repo.cached_operation_result(&id).unwrap(),
            Some(OperationResult::SyncSummary {
                synced: 2,
                failed: 1
            })
        );
        let row = s.repo.paranet_kc_record(&paranet().ual, &kc(2)).unwrap().unwrap();
        assert!(!row.is_synced);
        assert_eq!(row.retries, 1);
        assert!(row.error_message.unwrap().contains("root-2-0"));
    }

    #[tokio::test]
    async fn test_failed_state_stops_collection_and_counts_once() {
        let s = setup(1, &["root-1-1"]);
        s.chain.set_merkle_roots(
            BC,
            "0xkc",
            1,
            vec!["root-1-0".into(), "root-1-1".into(), "root-1-2".into()],
        );

        s.handler.execute(&command(OperationId::new())).await.unwrap();

        let asked: Vec<String> = s
            .fetcher
            .asked
            .lock()
            .unwrap()
            .iter()
            .map(|(_, state)| state.clone())
            .collect();
        assert_eq!(asked, vec!["root-1-0", "root-1-1"]);
        let stored: Vec<String> = s.store.insertions().into_iter().map(|i| i.state).collect();
        assert_eq!(stored, vec!["root-1-0"]);
        let row = s.repo.paranet_kc_record(&paranet().ual, &kc(1)).unwrap().unwrap();
        assert_eq!(row.retries, 1);
    }

    #[tokio::test]
    async fn test_retry_eligibility() {
        let s = setup(2, &[]);
        let now = now_millis();
        let stale = now - 2 * DELAY;
        s.repo
            .create_paranet_kc_records(&paranet().ual, BC, &[kc(1), kc(2)], stale)
            .unwrap();
        for _ in 0..2 {
            s.repo
                .paranet_kc_increment_retries(&paranet().ual, &kc(1), "boom", stale)
                .unwrap();
        }
        for _ in 0..3 {
            s.repo
                .paranet_kc_increment_retries(&paranet().ual, &kc(2), "boom", stale)
                .unwrap();
        }

        s.handler.execute(&command(OperationId::new())).await.unwrap();

        let asked: Vec<Ual> = s
            .fetcher
            .asked
            .lock()
            .unwrap()
            .iter()
            .map(|(ual, _)| ual.clone())
            .collect();
        assert_eq!(asked, vec![kc(1)]);
        assert!(s.repo.paranet_kc_record(&paranet().ual, &kc(1)).unwrap().unwrap().is_synced);
        assert!(!s.repo.paranet_kc_record(&paranet().ual, &kc(2)).unwrap().unwrap().is_synced);
    }

    #[tokio::test]
    async fn test_chain_outage_recovers_with_repeat() {
        let s = setup(1, &[]);
        s.chain.set_unavailable(true);
        let cmd = command(OperationId::new());

        let err = s.handler.execute(&cmd).await.unwrap_err();
        assert!(matches!(err, CommandError::Transient { .. }));
        assert_eq!(s.handler.recover(&cmd, &err).await, CommandOutcome::Repeat);
    }

    #[test]
    fn test_sync_command_is_recurring() {
        let cmd = command(OperationId::new());
        assert!(cmd.is_recurring());
        let request: ParanetSyncRequest = cmd.data.decode().unwrap();
        assert_eq!(request.paranet, paranet());
    }
}
