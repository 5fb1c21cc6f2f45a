//! Seeded in-memory collaborators for `trellis run --dev`.

use std::sync::Arc;

use trellis_chain::memory::MemoryChain;
use trellis_protocol::sim::{PeerMode, SimNetwork};
use trellis_types::operation::Assertion;
use trellis_types::paranet::{AccessPolicy, CollectionLocator, Paranet};
use trellis_types::ual::Ual;

pub const DEV_BLOCKCHAIN: &str = "otp:2043";
pub const DEV_STORAGE_CONTRACT: &str = "0xdev0000000000000000000000000000000000kc";
const DEV_PARANET_CONTRACT: &str = "0xdev00000000000000000000000000000paranet";
const STATES_PER_COLLECTION: usize = 2;

/// Chain and network pre-populated with two paranets whose content is
/// served by simulated peers.
pub struct DevNet {
    pub chain: Arc<MemoryChain>,
    pub network: Arc<SimNetwork>,
    pub paranets: Vec<Paranet>,
}

/// Build a devnet of `peers` online peers (plus one that rejects everything)
/// and `collections` members per paranet.
///
/// Tokens `1..=collections` belong to the open paranet and are served by
/// every peer. The curated paranet owns the next range and only its single
/// curator serves them.
pub fn seed(peers: usize, collections: u64) -> DevNet {
    let chain = Arc::new(MemoryChain::new());
    let network = Arc::new(SimNetwork::with_peers(peers));
    network.add_peer("peer-rejecting");
    network.set_mode("peer-rejecting", PeerMode::Rejecting);

    let open = paranet(1, "dev-open", AccessPolicy::Open);
    let curated = paranet(2, "dev-curated", AccessPolicy::Curated);
    network.add_paranet_peer(&curated.ual, "curator-00");

    for (paranet, first_token) in [(&open, 1), (&curated, collections + 1)] {
        chain.add_paranet(DEV_BLOCKCHAIN, &paranet.id);
        for token in first_token..first_token + collections {
            let locator = CollectionLocator::new(DEV_STORAGE_CONTRACT, token);
            let ual = locator.to_ual(DEV_BLOCKCHAIN);
            let roots = merkle_roots(token);
            for root in &roots {
                let content = dev_assertion(&ual, root);
                match paranet.access_policy {
                    AccessPolicy::Open => network.serve_everywhere(&ual, root, &content),
                    AccessPolicy::Curated => network.serve("curator-00", &ual, root, content),
                }
            }
            chain.set_merkle_roots(DEV_BLOCKCHAIN, DEV_STORAGE_CONTRACT, token, roots);
            chain.add_paranet_member(DEV_BLOCKCHAIN, &paranet.id, locator);
        }
    }

    DevNet {
        chain,
        network,
        paranets: vec![open, curated],
    }
}

fn paranet(token_id: u64, id: &str, access_policy: AccessPolicy) -> Paranet {
    Paranet {
        ual: Ual::derive(DEV_BLOCKCHAIN, DEV_PARANET_CONTRACT, token_id),
        id: id.to_string(),
        blockchain: DEV_BLOCKCHAIN.to_string(),
        access_policy,
    }
}

fn merkle_roots(token_id: u64) -> Vec<String> {
    (0..STATES_PER_COLLECTION)
        .map(|i| format!("0x{:062x}{:02x}", token_id, i))
        .collect()
}

/// Deterministic content for one state of a devnet collection.
pub fn dev_assertion(ual: &Ual, state: &str) -> Assertion {
    Assertion::new(vec![
        format!("<{}> <http://schema.org/name> \"{}\" .", ual, ual.token_id()),
        format!("<{}> <http://schema.org/version> \"{}\" .", ual, state),
    ])
}
