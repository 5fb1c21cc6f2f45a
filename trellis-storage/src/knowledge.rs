use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use trellis_types::operation::Assertion;
use trellis_types::paranet::StoragePartition;
use trellis_types::ual::Ual;

use crate::error::StorageError;

/// Knowledge-store contract: partitioned assertion storage keyed by
/// (partition, UAL, state).
///
/// A state is the merkle root identifying one historical version of a
/// knowledge collection.
#[async_trait]
pub trait TripleStore: Send + Sync {
    /// Write one state of a collection into a partition. Re-inserting the
    /// same state overwrites it.
    async fn insert(
        &self,
        partition: &StoragePartition,
        ual: &Ual,
        state: &str,
        assertion: &Assertion,
    ) -> Result<(), StorageError>;

    /// Read one state from a specific partition.
    async fn get(
        &self,
        partition: &StoragePartition,
        ual: &Ual,
        state: &str,
    ) -> Result<Option<Assertion>, StorageError>;

    /// Look a state up in the node's general-purpose partitions
    /// (`dkg`, then `public-current`).
    async fn local_fetch(&self, ual: &Ual, state: &str) -> Result<Option<Assertion>, StorageError> {
        for partition in [StoragePartition::Dkg, StoragePartition::PublicCurrent] {
            if let Some(found) = self.get(&partition, ual, state).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Move every state of `ual` from one partition to another.
    /// Returns false when the source holds nothing for it.
    async fn move_assertion(
        &self,
        from: &StoragePartition,
        to: &StoragePartition,
        ual: &Ual,
    ) -> Result<bool, StorageError>;
}

/// One recorded write, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub partition: StoragePartition,
    pub ual: Ual,
    pub state: String,
}

type States = BTreeMap<String, Assertion>;

/// In-memory knowledge store.
///
/// Keeps a journal of every insert so callers can check write order.
pub struct MemoryTripleStore {
    partitions: RwLock<HashMap<(StoragePartition, Ual), States>>,
    journal: RwLock<Vec<Insertion>>,
}

impl MemoryTripleStore {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            journal: RwLock::new(Vec::new()),
        }
    }

    /// Every insert performed so far, oldest first.
    pub fn insertions(&self) -> Vec<Insertion> {
        self.journal
            .read()
            .map(|journal| journal.clone())
            .unwrap_or_default()
    }

    /// Number of states held for `ual` in `partition`.
    pub fn state_count(&self, partition: &StoragePartition, ual: &Ual) -> usize {
        self.partitions
            .read()
            .map(|p| p.get(&(partition.clone(), ual.clone())).map_or(0, |s| s.len()))
            .unwrap_or(0)
    }
}

impl Default for MemoryTripleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripleStore for MemoryTripleStore {
    async fn insert(
        &self,
        partition: &StoragePartition,
        ual: &Ual,
        state: &str,
        assertion: &Assertion,
    ) -> Result<(), StorageError> {
        {
            let mut partitions =
                self.partitions
                    .write()
                    .map_err(|e| StorageError::KnowledgeStoreError {
                        reason: e.to_string(),
                    })?;
            partitions
                .entry((partition.clone(), ual.clone()))
                .or_default()
                .insert(state.to_string(), assertion.clone());
        }
        let mut journal = self
            .journal
            .write()
            .map_err(|e| StorageError::KnowledgeStoreError {
                reason: e.to_string(),
            })?;
        journal.push(Insertion {
            partition: partition.clone(),
            ual: ual.clone(),
            state: state.to_string(),
        });
        Ok(())
    }

    async fn get(
        &self,
        partition: &StoragePartition,
        ual: &Ual,
        state: &str,
    ) -> Result<Option<Assertion>, StorageError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|e| StorageError::KnowledgeStoreError {
                reason: e.to_string(),
            })?;
        Ok(partitions
            .get(&(partition.clone(), ual.clone()))
            .and_then(|states| states.get(state))
            .cloned())
    }

    async fn move_assertion(
        &self,
        from: &StoragePartition,
        to: &StoragePartition,
        ual: &Ual,
    ) -> Result<bool, StorageError> {
        let mut partitions =
            self.partitions
                .write()
                .map_err(|e| StorageError::KnowledgeStoreError {
                    reason: e.to_string(),
                })?;
        let Some(states) = partitions.remove(&(from.clone(), ual.clone())) else {
            return Ok(false);
        };
        partitions
            .entry((to.clone(), ual.clone()))
            .or_default()
            .extend(states);
        Ok(true)
    }
}
