use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use trellis_types::operation::Assertion;
use trellis_types::primitives::{Keyword, PeerId};
use trellis_types::ual::Ual;

use crate::error::ProtocolError;
use crate::network::{PeerNetwork, PeerResponse, ProtocolRequest};

/// How a simulated peer treats incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    /// Serves what it holds and stores what it is sent.
    Online,
    /// Answers every request with a nack.
    Rejecting,
    /// Fails the connection immediately.
    Unreachable,
    /// Never answers.
    Hanging,
}

struct SimPeer {
    mode: PeerMode,
    latency: Duration,
    content: HashMap<(Ual, String), Assertion>,
}

impl SimPeer {
    fn new() -> Self {
        Self {
            mode: PeerMode::Online,
            latency: Duration::ZERO,
            content: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct SimState {
    peers: BTreeMap<PeerId, SimPeer>,
    paranet_peers: HashMap<Ual, Vec<PeerId>>,
}

/// In-process peer network with per-peer behaviour.
///
/// Every peer belongs to the single shard, so discovery returns all of them
/// in id order. Each `send` is recorded for later inspection.
#[derive(Default)]
pub struct SimNetwork {
    state: RwLock<SimState>,
    contacted: Mutex<Vec<PeerId>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network of `count` online peers named `peer-00`, `peer-01`, ...
    pub fn with_peers(count: usize) -> Self {
        let net = Self::new();
        for i in 0..count {
            net.add_peer(&Self::peer_name(i));
        }
        net
    }

    pub fn peer_name(index: usize) -> String {
        format!("peer-{:02}", index)
    }

    pub fn add_peer(&self, id: &str) {
        if let Ok(mut state) = self.state.write() {
            state.peers.entry(PeerId::new(id)).or_insert_with(SimPeer::new);
        }
    }

    pub fn set_mode(&self, id: &str, mode: PeerMode) {
        self.with_peer(id, |peer| peer.mode = mode);
    }

    pub fn set_latency(&self, id: &str, latency: Duration) {
        self.with_peer(id, |peer| peer.latency = latency);
    }

    /// Let one peer serve a collection state.
    pub fn serve(&self, id: &str, ual: &Ual, state: &str, assertion: Assertion) {
        self.with_peer(id, |peer| {
            peer.content
                .insert((ual.clone(), state.to_string()), assertion);
        });
    }

    /// Let every known peer serve a collection state.
    pub fn serve_everywhere(&self, ual: &Ual, state: &str, assertion: &Assertion) {
        if let Ok(mut s) = self.state.write() {
            for peer in s.peers.values_mut() {
                peer.content
                    .insert((ual.clone(), state.to_string()), assertion.clone());
            }
        }
    }

    pub fn add_paranet_peer(&self, paranet_ual: &Ual, id: &str) {
        self.add_peer(id);
        if let Ok(mut state) = self.state.write() {
            state
                .paranet_peers
                .entry(paranet_ual.clone())
                .or_default()
                .push(PeerId::new(id));
        }
    }

    /// Peers contacted so far, in send order.
    pub fn contacted(&self) -> Vec<PeerId> {
        self.contacted
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Whether a peer holds a given state, e.g. after a publish.
    pub fn holds(&self, id: &str, ual: &Ual, state: &str) -> bool {
        self.state
            .read()
            .ok()
            .and_then(|s| {
                s.peers
                    .get(&PeerId::new(id))
                    .map(|p| p.content.contains_key(&(ual.clone(), state.to_string())))
            })
            .unwrap_or(false)
    }

    fn with_peer(&self, id: &str, f: impl FnOnce(&mut SimPeer)) {
        if let Ok(mut state) = self.state.write() {
            f(state
                .peers
                .entry(PeerId::new(id))
                .or_insert_with(SimPeer::new));
        }
    }
}

#[async_trait]
impl PeerNetwork for SimNetwork {
    async fn find_shard_peers(
        &self,
        _blockchain: &str,
        _keyword: &Keyword,
    ) -> Result<Vec<PeerId>, ProtocolError> {
        let state = self.state.read().map_err(|e| ProtocolError::InvalidRequest {
            reason: e.to_string(),
        })?;
        Ok(state.peers.keys().cloned().collect())
    }

    async fn paranet_peers(
        &self,
        _blockchain: &str,
        paranet_ual: &Ual,
    ) -> Result<Vec<PeerId>, ProtocolError> {
        let state = self.state.read().map_err(|e| ProtocolError::InvalidRequest {
            reason: e.to_string(),
        })?;
        Ok(state
            .paranet_peers
            .get(paranet_ual)
            .cloned()
            .unwrap_or_default())
    }

    async fn send(
        &self,
        peer: &PeerId,
        request: &ProtocolRequest,
    ) -> Result<PeerResponse, ProtocolError> {
        if let Ok(mut contacted) = self.contacted.lock() {
            contacted.push(peer.clone());
        }

        let (mode, latency) = {
            let state = self.state.read().map_err(|e| ProtocolError::InvalidRequest {
                reason: e.to_string(),
            })?;
            match state.peers.get(peer) {
                Some(p) => (p.mode, p.latency),
                None => (PeerMode::Unreachable, Duration::ZERO),
            }
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match mode {
            PeerMode::Hanging => std::future::pending().await,
            PeerMode::Unreachable => Err(ProtocolError::TransientNetwork {
                peer: peer.to_string(),
                reason: "connection refused".to_string(),
            }),
            PeerMode::Rejecting => Ok(PeerResponse::Nack {
                reason: "request rejected".to_string(),
            }),
            PeerMode::Online => {
                let mut state = self.state.write().map_err(|e| ProtocolError::InvalidRequest {
                    reason: e.to_string(),
                })?;
                let Some(sim) = state.peers.get_mut(peer) else {
                    return Err(ProtocolError::TransientNetwork {
                        peer: peer.to_string(),
                        reason: "peer vanished".to_string(),
                    });
                };
                let key = (request.ual().clone(), request.state().to_string());
                match request.assertion() {
                    Some(assertion) => {
                        sim.content.insert(key, assertion.clone());
                        Ok(PeerResponse::Ack { assertion: None })
                    }
                    None => match sim.content.get(&key) {
                        Some(found) => Ok(PeerResponse::Ack {
                            assertion: Some(found.clone()),
                        }),
                        None => Ok(PeerResponse::Nack {
                            reason: "assertion not found".to_string(),
                        }),
                    },
                }
            }
        }
    }
}
