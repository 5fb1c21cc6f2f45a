use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use trellis_storage::knowledge::TripleStore;
use trellis_storage::traits::OperationRepository;
use trellis_types::constants::NOT_FOUND_MESSAGE;
use trellis_types::operation::{
    Assertion, OperationId, OperationKind, OperationResult, OperationStatus,
};
use trellis_types::primitives::{now_millis, Keyword, PeerId};

use crate::error::ProtocolError;
use crate::network::{PeerNetwork, PeerResponse};
use crate::request::{RouteAction, ScheduleRequest};
use crate::tally::{ResponseTally, TallyDecision};

type TallyKey = (OperationId, Keyword);

struct TallyEntry {
    tally: ResponseTally,
    request: Arc<ScheduleRequest>,
    last_assertion: Option<Assertion>,
}

/// Outcome counters since startup.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    completed: AtomicU64,
    not_found: AtomicU64,
    failed: AtomicU64,
}

impl CoordinatorStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Owns the live reply tallies and turns their decisions into peer rounds
/// and persisted operation outcomes.
///
/// Each (operation, keyword) tally sits behind its own async mutex, so
/// replies for one keyword are applied one at a time while different
/// keywords proceed independently. The registry lock is only held to look
/// up, insert or remove an entry.
pub struct OperationCoordinator {
    network: Arc<dyn PeerNetwork>,
    operations: Arc<dyn OperationRepository>,
    store: Arc<dyn TripleStore>,
    peer_timeout: Duration,
    tallies: Mutex<HashMap<TallyKey, Arc<AsyncMutex<TallyEntry>>>>,
    stats: CoordinatorStats,
}

impl OperationCoordinator {
    pub fn new(
        network: Arc<dyn PeerNetwork>,
        operations: Arc<dyn OperationRepository>,
        store: Arc<dyn TripleStore>,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            network,
            operations,
            store,
            peer_timeout,
            tallies: Mutex::new(HashMap::new()),
            stats: CoordinatorStats::default(),
        }
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    /// Number of tallies still waiting on replies.
    pub fn open_tallies(&self) -> usize {
        self.registry().len()
    }

    /// Open the tally for one keyword and contact its first round of peers.
    pub async fn open(self: &Arc<Self>, request: ScheduleRequest) -> Result<(), ProtocolError> {
        let id = request.operation_id;
        self.operations
            .update_operation_status(&id, OperationStatus::FetchFromNodesStart, now_millis())?;

        let key = (id, request.keyword.clone());
        let mut tally = ResponseTally::new(
            request.nodes.clone(),
            request.batch_size,
            request.min_ack_responses,
        );
        let request = Arc::new(request);

        match tally.start() {
            TallyDecision::Reschedule(peers) => {
                info!(
                    operation_id = %id,
                    keyword = %key.1,
                    candidates = tally.total(),
                    batch_size = request.batch_size,
                    min_ack_responses = tally.min_ack_responses(),
                    "opening tally"
                );
                let entry = TallyEntry {
                    tally,
                    request: Arc::clone(&request),
                    last_assertion: None,
                };
                self.registry()
                    .insert(key.clone(), Arc::new(AsyncMutex::new(entry)));
                self.dispatch(key, request, peers);
                Ok(())
            }
            TallyDecision::Exhausted => {
                warn!(operation_id = %id, keyword = %key.1, "no candidate peers");
                self.finish_exhausted(&request, &tally).await
            }
            _ => Ok(()),
        }
    }

    /// Apply one peer reply to its tally and act on the decision.
    ///
    /// Replies for tallies that are unknown or already finished are ignored.
    pub async fn process_response(
        self: &Arc<Self>,
        key: &(OperationId, Keyword),
        peer: &PeerId,
        reply: Result<PeerResponse, ProtocolError>,
    ) -> Result<(), ProtocolError> {
        let entry = self.registry().get(key).cloned();
        let Some(entry) = entry else {
            debug!(operation_id = %key.0, peer = %peer, "reply for a closed tally ignored");
            return Ok(());
        };
        let mut entry = entry.lock().await;

        let kind = entry.request.kind;
        let success = match &reply {
            Ok(response) => response.satisfies(kind),
            Err(_) => false,
        };
        match &reply {
            Ok(PeerResponse::Nack { reason }) => {
                debug!(operation_id = %key.0, peer = %peer, reason = %reason, "peer nacked")
            }
            Err(e) => debug!(operation_id = %key.0, peer = %peer, error = %e, "peer failed"),
            Ok(PeerResponse::Ack { .. }) => {}
        }

        let decision = entry.tally.record(peer, success);
        if success && decision != TallyDecision::Ignored {
            if let Ok(PeerResponse::Ack {
                assertion: Some(assertion),
            }) = reply
            {
                entry.last_assertion = Some(assertion);
            }
        }

        match decision {
            TallyDecision::Wait | TallyDecision::Ignored => Ok(()),
            TallyDecision::Reschedule(peers) => {
                debug!(
                    operation_id = %key.0,
                    keyword = %key.1,
                    peers = peers.len(),
                    failed = entry.tally.failed(),
                    "rescheduling leftover peers"
                );
                let request = Arc::clone(&entry.request);
                drop(entry);
                self.dispatch(key.clone(), request, peers);
                Ok(())
            }
            TallyDecision::Success => {
                self.registry().remove(key);
                self.finish_success(&entry).await
            }
            TallyDecision::Exhausted => {
                self.registry().remove(key);
                self.finish_exhausted(&entry.request, &entry.tally).await
            }
        }
    }

    fn dispatch(self: &Arc<Self>, key: TallyKey, request: Arc<ScheduleRequest>, peers: Vec<PeerId>) {
        for peer in peers {
            let coordinator = Arc::clone(self);
            let key = key.clone();
            let request = Arc::clone(&request);
            tokio::spawn(async move {
                let reply = match tokio::time::timeout(
                    coordinator.peer_timeout,
                    coordinator.network.send(&peer, &request.request),
                )
                .await
                {
                    Ok(reply) => reply,
                    Err(_) => Err(ProtocolError::TransientNetwork {
                        peer: peer.to_string(),
                        reason: format!("no reply within {:?}", coordinator.peer_timeout),
                    }),
                };
                if let Err(e) = coordinator.process_response(&key, &peer, reply).await {
                    warn!(operation_id = %key.0, peer = %peer, error = %e, "failed to apply reply");
                }
            });
        }
    }

    async fn finish_success(&self, entry: &TallyEntry) -> Result<(), ProtocolError> {
        let request = &entry.request;
        let id = request.operation_id;
        let now = now_millis();
        self.operations
            .update_operation_status(&id, OperationStatus::FetchFromNodesEnd, now)?;

        let result = match request.kind {
            OperationKind::Get | OperationKind::ParanetSync => {
                let Some(assertion) = entry.last_assertion.clone() else {
                    return self
                        .fail(request, "quorum reached without content".to_string())
                        .await;
                };
                if let Err(e) = self.route(request, &assertion).await {
                    return self.fail(request, e.to_string()).await;
                }
                OperationResult::Found { assertion }
            }
            OperationKind::Publish | OperationKind::Update => OperationResult::Acknowledged {
                acks: entry.tally.completed() as u32,
            },
        };

        self.operations
            .finish_operation(&id, OperationStatus::Completed, &result, now_millis())?;
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        info!(
            operation_id = %id,
            keyword = %request.keyword,
            acks = entry.tally.completed(),
            "operation completed"
        );
        Ok(())
    }

    async fn finish_exhausted(
        &self,
        request: &ScheduleRequest,
        tally: &ResponseTally,
    ) -> Result<(), ProtocolError> {
        let id = request.operation_id;
        match request.kind {
            OperationKind::Get | OperationKind::ParanetSync => {
                let result = OperationResult::NotFound {
                    message: NOT_FOUND_MESSAGE.to_string(),
                };
                self.operations
                    .finish_operation(&id, OperationStatus::Completed, &result, now_millis())?;
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
                info!(
                    operation_id = %id,
                    keyword = %request.keyword,
                    failed = tally.failed(),
                    "content not found on the network"
                );
                Ok(())
            }
            OperationKind::Publish | OperationKind::Update => {
                let reason = format!(
                    "{} of {} required acks received",
                    tally.completed(),
                    tally.min_ack_responses()
                );
                self.fail(request, reason).await
            }
        }
    }

    async fn fail(&self, request: &ScheduleRequest, message: String) -> Result<(), ProtocolError> {
        warn!(
            operation_id = %request.operation_id,
            keyword = %request.keyword,
            error = %message,
            "operation failed"
        );
        let result = OperationResult::Error { message };
        self.operations.finish_operation(
            &request.operation_id,
            OperationStatus::Failed,
            &result,
            now_millis(),
        )?;
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write fetched content where the request's routing says it belongs.
    async fn route(
        &self,
        request: &ScheduleRequest,
        assertion: &Assertion,
    ) -> Result<(), ProtocolError> {
        let Some(routing) = &request.routing else {
            return Ok(());
        };
        let ual = request.request.ual();
        let state = request.request.state();
        for action in routing.actions() {
            match action {
                RouteAction::Insert(partition) => {
                    self.store.insert(&partition, ual, state, assertion).await?;
                }
                RouteAction::Move { from, to } => {
                    let moved = self.store.move_assertion(&from, &to, ual).await?;
                    debug!(ual = %ual, from = %from.name(), to = %to.name(), moved, "moved earlier state");
                }
            }
        }
        Ok(())
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<TallyKey, Arc<AsyncMutex<TallyEntry>>>> {
        self.tallies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
