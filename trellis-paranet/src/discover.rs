use std::sync::Arc;

use tracing::{debug, info};

use trellis_chain::traits::Blockchain;
use trellis_storage::traits::ParanetKcRepository;
use trellis_types::paranet::Paranet;
use trellis_types::primitives::now_millis;
use trellis_types::ual::Ual;

use crate::error::SyncError;

/// Result of one membership discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Members registered on chain.
    pub on_chain: u64,
    /// Tracking rows held before this pass.
    pub local: u64,
    /// Rows created by this pass.
    pub created: usize,
}

/// Brings the local tracking table up to the paranet's on-chain member list.
pub struct MembershipDiscovery {
    chain: Arc<dyn Blockchain>,
    kcs: Arc<dyn ParanetKcRepository>,
    page_size: u64,
}

impl MembershipDiscovery {
    pub fn new(chain: Arc<dyn Blockchain>, kcs: Arc<dyn ParanetKcRepository>, page_size: u64) -> Self {
        Self {
            chain,
            kcs,
            page_size: page_size.max(1),
        }
    }

    /// Page the membership list from the local count onward and record every
    /// new member as an unsynced row. Re-running is harmless: rows already
    /// present are skipped.
    pub async fn discover(&self, paranet: &Paranet) -> Result<DiscoveryReport, SyncError> {
        let blockchain = paranet.blockchain.as_str();
        let on_chain = self
            .chain
            .paranet_collection_count(blockchain, &paranet.id)
            .await?;
        let local = self.kcs.paranet_kc_count(&paranet.ual)?;

        let mut created = 0;
        let mut offset = local;
        while offset < on_chain {
            let limit = self.page_size.min(on_chain - offset);
            let page = self
                .chain
                .paranet_collection_locators(blockchain, &paranet.id, offset, limit)
                .await?;
            if page.is_empty() {
                break;
            }
            let uals: Vec<Ual> = page.iter().map(|l| l.to_ual(blockchain)).collect();
            created += self
                .kcs
                .create_paranet_kc_records(&paranet.ual, blockchain, &uals, now_millis())?;
            debug!(paranet = %paranet.ual, offset, fetched = page.len(), "membership page");
            offset += page.len() as u64;
        }

        if created > 0 {
            info!(
                paranet = %paranet.ual,
                on_chain,
                local,
                created,
                "new paranet members discovered"
            );
        }
        Ok(DiscoveryReport {
            on_chain,
            local,
            created,
        })
    }
}
