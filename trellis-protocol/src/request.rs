use serde::{Deserialize, Serialize};

use trellis_types::operation::{OperationId, OperationKind};
use trellis_types::paranet::StoragePartition;
use trellis_types::primitives::{Keyword, PeerId};
use trellis_types::ual::Ual;

use crate::network::ProtocolRequest;

/// Where a successful GET writes the content it fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetRouting {
    /// Store into `public-current`.
    pub asset_sync: bool,
    /// Additionally store into the paranet's partitions.
    pub paranet_sync: bool,
    pub paranet_ual: Option<Ual>,
    /// The fetched state is the paranet's latest.
    pub paranet_latest: bool,
    /// Historical repository suffix for non-latest states.
    pub paranet_repo_id: Option<String>,
    /// Move the previous latest state into the historical repository
    /// instead of writing the fetched one.
    pub delete_from_earlier: bool,
}

/// One storage action derived from [`GetRouting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    Insert(StoragePartition),
    Move {
        from: StoragePartition,
        to: StoragePartition,
    },
}

impl GetRouting {
    /// Storage actions to apply, in order, once content is found.
    pub fn actions(&self) -> Vec<RouteAction> {
        let mut actions = Vec::new();
        if !self.asset_sync {
            return actions;
        }
        actions.push(RouteAction::Insert(StoragePartition::PublicCurrent));

        let Some(paranet) = self.paranet_ual.clone().filter(|_| self.paranet_sync) else {
            return actions;
        };
        if self.paranet_latest {
            actions.push(RouteAction::Insert(StoragePartition::ParanetCurrent(paranet)));
        } else if let Some(repo_id) = self.paranet_repo_id.clone() {
            let historical = StoragePartition::ParanetHistorical {
                paranet: paranet.clone(),
                repo_id,
            };
            if self.delete_from_earlier {
                actions.push(RouteAction::Move {
                    from: StoragePartition::ParanetCurrent(paranet),
                    to: historical,
                });
            } else {
                actions.push(RouteAction::Insert(historical));
            }
        }
        actions
    }
}

/// Payload of the commands that start an operation
/// (`network*Command`, `localGetCommand`, `storeAssertionCommand`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub operation_id: OperationId,
    pub blockchain: String,
    pub request: ProtocolRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<GetRouting>,
}

/// Payload of `scheduleMessagesCommand`: everything needed to open the
/// tally for one keyword and contact its first round of peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub operation_id: OperationId,
    pub blockchain: String,
    pub kind: OperationKind,
    pub keyword: Keyword,
    pub batch_size: usize,
    pub min_ack_responses: usize,
    /// Candidate peers, in contact order.
    pub nodes: Vec<PeerId>,
    pub request: ProtocolRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<GetRouting>,
}
