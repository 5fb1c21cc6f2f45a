use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use trellis_types::command::{Command, CommandId, CommandStatus};
use trellis_types::operation::{Operation, OperationId, OperationResult, OperationStatus};
use trellis_types::paranet::ParanetSyncRecord;
use trellis_types::primitives::Timestamp;
use trellis_types::ual::Ual;

use crate::error::StorageError;
use crate::traits::{CommandRepository, OperationRepository, ParanetKcRepository};

type KcKey = (String, String);

fn kc_key(paranet_ual: &Ual, ual: &Ual) -> KcKey {
    (paranet_ual.to_string(), ual.to_string())
}

/// In-memory repository backend.
/// Each table sits behind its own lock so unrelated writers never contend.
pub struct MemoryRepository {
    commands: RwLock<BTreeMap<CommandId, Command>>,
    operations: RwLock<HashMap<OperationId, (Operation, Option<OperationResult>)>>,
    paranet_kcs: RwLock<BTreeMap<KcKey, ParanetSyncRecord>>,
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(HashMap::new()),
            paranet_kcs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Apply `f` to a command if it is in one of `allowed` states.
    fn update_command_if(
        &self,
        id: &CommandId,
        allowed: &[CommandStatus],
        f: impl FnOnce(&mut Command),
    ) -> Result<bool, StorageError> {
        let mut commands = self.commands.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        match commands.get_mut(id) {
            Some(cmd) if allowed.contains(&cmd.status) => {
                f(cmd);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn update_kc(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        f: impl FnOnce(&mut ParanetSyncRecord),
    ) -> Result<bool, StorageError> {
        let mut rows = self
            .paranet_kcs
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        match rows.get_mut(&kc_key(paranet_ual, ual)) {
            Some(row) => {
                f(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_kcs(
        &self,
        paranet_ual: &Ual,
        filter: impl Fn(&ParanetSyncRecord) -> bool,
    ) -> Result<u64, StorageError> {
        let rows = self.paranet_kcs.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(rows
            .values()
            .filter(|r| r.paranet_ual == *paranet_ual && filter(r))
            .count() as u64)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRepository for MemoryRepository {
    fn insert_command(&self, command: &Command) -> Result<(), StorageError> {
        let mut commands = self.commands.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        commands.insert(command.id, command.clone());
        Ok(())
    }

    fn get_command(&self, id: &CommandId) -> Result<Option<Command>, StorageError> {
        let commands = self.commands.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(commands.get(id).cloned())
    }

    fn ready_commands(&self, now: Timestamp, limit: usize) -> Result<Vec<Command>, StorageError> {
        let commands = self.commands.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut ready: Vec<Command> = commands
            .values()
            .filter(|c| c.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        ready.truncate(limit);
        Ok(ready)
    }

    fn claim_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError> {
        self.update_command_if(id, &[CommandStatus::Pending], |cmd| {
            cmd.status = CommandStatus::Running;
            cmd.started_at = Some(now);
            cmd.updated_at = now;
        })
    }

    fn transition_command(
        &self,
        id: &CommandId,
        from: CommandStatus,
        to: CommandStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.update_command_if(id, &[from], |cmd| {
            cmd.status = to;
            cmd.updated_at = now;
        })
    }

    fn retry_command(
        &self,
        id: &CommandId,
        error: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.update_command_if(id, &[CommandStatus::Running], |cmd| {
            cmd.status = CommandStatus::Pending;
            cmd.retries = cmd.retries.saturating_sub(1);
            cmd.last_error = Some(error.to_string());
            cmd.started_at = None;
            cmd.updated_at = now;
        })
    }

    fn rearm_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError> {
        self.update_command_if(
            id,
            &[CommandStatus::Running, CommandStatus::Repeating],
            |cmd| {
                cmd.status = CommandStatus::Pending;
                cmd.updated_at = now;
            },
        )
    }

    fn fail_command(
        &self,
        id: &CommandId,
        error: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.update_command_if(id, &[CommandStatus::Running], |cmd| {
            cmd.status = CommandStatus::Failed;
            cmd.last_error = Some(error.to_string());
            cmd.updated_at = now;
        })
    }

    fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<Command>, StorageError> {
        let commands = self.commands.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut matching: Vec<Command> = commands
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|c| c.created_at);
        Ok(matching)
    }

    fn reset_interrupted_commands(&self, now: Timestamp) -> Result<usize, StorageError> {
        let mut commands = self.commands.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        let mut reset = 0;
        for cmd in commands.values_mut() {
            if cmd.status == CommandStatus::Running {
                cmd.status = CommandStatus::Pending;
                cmd.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn remove_finished_commands(&self, cutoff: Timestamp) -> Result<usize, StorageError> {
        let mut commands = self.commands.write().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        let before = commands.len();
        commands.retain(|_, c| {
            !(c.status.is_finished() && !c.is_recurring() && c.updated_at < cutoff)
        });
        Ok(before - commands.len())
    }
}

impl OperationRepository for MemoryRepository {
    fn create_operation(&self, operation: &Operation) -> Result<(), StorageError> {
        let mut ops = self
            .operations
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        ops.insert(operation.id, (operation.clone(), None));
        Ok(())
    }

    fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, StorageError> {
        let ops = self.operations.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(ops.get(id).map(|(op, _)| op.clone()))
    }

    fn update_operation_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let mut ops = self
            .operations
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        match ops.get_mut(id) {
            Some((op, _)) if !op.status.is_terminal() => {
                op.status = status;
                op.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn restart_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let mut ops = self
            .operations
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        match ops.get_mut(id) {
            Some((op, result)) => {
                op.status = status;
                op.updated_at = now;
                *result = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn cached_operation_result(
        &self,
        id: &OperationId,
    ) -> Result<Option<OperationResult>, StorageError> {
        let ops = self.operations.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(ops.get(id).and_then(|(_, result)| result.clone()))
    }

    fn finish_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        result: &OperationResult,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let mut ops = self
            .operations
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        let (op, cached) = ops.get_mut(id).ok_or_else(|| StorageError::NotFound {
            key: format!("operation {}", id),
        })?;
        if op.status.is_terminal() {
            return Ok(false);
        }
        op.status = status;
        op.updated_at = now;
        *cached = Some(result.clone());
        Ok(true)
    }
}

impl ParanetKcRepository for MemoryRepository {
    fn create_paranet_kc_records(
        &self,
        paranet_ual: &Ual,
        blockchain_id: &str,
        uals: &[Ual],
        now: Timestamp,
    ) -> Result<usize, StorageError> {
        let mut rows = self
            .paranet_kcs
            .write()
            .map_err(|e| StorageError::WriteError {
                reason: e.to_string(),
            })?;
        let mut created = 0;
        for ual in uals {
            rows.entry(kc_key(paranet_ual, ual)).or_insert_with(|| {
                created += 1;
                ParanetSyncRecord::new(paranet_ual.clone(), ual.clone(), blockchain_id, now)
            });
        }
        Ok(created)
    }

    fn paranet_kc_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.count_kcs(paranet_ual, |_| true)
    }

    fn paranet_kc_synced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.count_kcs(paranet_ual, |r| r.is_synced)
    }

    fn paranet_kc_unsynced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.count_kcs(paranet_ual, |r| !r.is_synced)
    }

    fn paranet_kc_sync_batch(
        &self,
        paranet_ual: &Ual,
        retries_limit: u32,
        retry_delay_ms: u64,
        limit: usize,
        now: Timestamp,
    ) -> Result<Vec<ParanetSyncRecord>, StorageError> {
        let rows = self.paranet_kcs.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        let mut batch: Vec<ParanetSyncRecord> = rows
            .values()
            .filter(|r| r.paranet_ual == *paranet_ual)
            .filter(|r| r.is_eligible(retries_limit, retry_delay_ms, now))
            .cloned()
            .collect();
        batch.sort_by(|a, b| {
            b.retries
                .cmp(&a.retries)
                .then(a.created_at.cmp(&b.created_at))
        });
        batch.truncate(limit);
        Ok(batch)
    }

    fn paranet_kc_mark_synced(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.update_kc(paranet_ual, ual, |row| {
            row.is_synced = true;
            row.updated_at = now;
        })
    }

    fn paranet_kc_increment_retries(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        error_message: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.update_kc(paranet_ual, ual, |row| {
            row.retries += 1;
            row.error_message = Some(error_message.to_string());
            row.updated_at = now;
        })
    }

    fn paranet_kc_record(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
    ) -> Result<Option<ParanetSyncRecord>, StorageError> {
        let rows = self.paranet_kcs.read().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(rows.get(&kc_key(paranet_ual, ual)).cloned())
    }
}
