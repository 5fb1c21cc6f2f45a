use trellis_types::command::{Command, CommandId, CommandStatus};
use trellis_types::operation::{Operation, OperationId, OperationResult, OperationStatus};
use trellis_types::paranet::ParanetSyncRecord;
use trellis_types::primitives::Timestamp;
use trellis_types::ual::Ual;

use crate::error::StorageError;

/// Durable command queue.
///
/// Every status transition is a single-row conditional write: it only
/// applies when the row is still in the expected state, and reports whether
/// it did. That is what guarantees at most one claim per command id.
pub trait CommandRepository: Send + Sync {
    fn insert_command(&self, command: &Command) -> Result<(), StorageError>;

    fn get_command(&self, id: &CommandId) -> Result<Option<Command>, StorageError>;

    /// Pending commands ready at `now`, by priority desc then created_at asc.
    fn ready_commands(&self, now: Timestamp, limit: usize) -> Result<Vec<Command>, StorageError>;

    /// PENDING -> RUNNING, stamping `started_at`.
    fn claim_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError>;

    /// Move `from` -> `to` if the row is still in `from`.
    fn transition_command(
        &self,
        id: &CommandId,
        from: CommandStatus,
        to: CommandStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    /// RUNNING -> PENDING with one less retry and the failure recorded.
    /// Clears `started_at`, so a recurring command retries without waiting
    /// out its period.
    fn retry_command(&self, id: &CommandId, error: &str, now: Timestamp)
        -> Result<bool, StorageError>;

    /// RUNNING|REPEATING -> PENDING, keeping `started_at` as the last run.
    fn rearm_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError>;

    /// RUNNING -> FAILED with the failure recorded.
    fn fail_command(&self, id: &CommandId, error: &str, now: Timestamp)
        -> Result<bool, StorageError>;

    /// Commands in the given status, oldest first.
    fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<Command>, StorageError>;

    /// RUNNING -> PENDING for every row; used at startup after a crash.
    fn reset_interrupted_commands(&self, now: Timestamp) -> Result<usize, StorageError>;

    /// Delete finished one-shot commands last touched before `cutoff`.
    fn remove_finished_commands(&self, cutoff: Timestamp) -> Result<usize, StorageError>;
}

/// Operation records polled by callers.
pub trait OperationRepository: Send + Sync {
    fn create_operation(&self, operation: &Operation) -> Result<(), StorageError>;

    fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, StorageError>;

    /// Move an operation to a new phase. Terminal operations are left as-is
    /// and `false` is returned.
    fn update_operation_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    /// Force an operation back into a non-terminal phase and drop its cached
    /// result, so the same id can be reused for another attempt.
    fn restart_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    fn cached_operation_result(
        &self,
        id: &OperationId,
    ) -> Result<Option<OperationResult>, StorageError>;

    /// Move to a terminal status and store the final result in one write.
    /// An operation that is already terminal keeps both its status and its
    /// result, and `false` is returned. Unknown ids are `NotFound`.
    fn finish_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        result: &OperationResult,
        now: Timestamp,
    ) -> Result<bool, StorageError>;
}

/// Paranet membership tracking rows, unique on (ual, paranet_ual).
pub trait ParanetKcRepository: Send + Sync {
    /// Insert unsynced rows; duplicates on the unique key are skipped.
    /// Returns the number of rows actually created.
    fn create_paranet_kc_records(
        &self,
        paranet_ual: &Ual,
        blockchain_id: &str,
        uals: &[Ual],
        now: Timestamp,
    ) -> Result<usize, StorageError>;

    fn paranet_kc_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError>;

    fn paranet_kc_synced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError>;

    fn paranet_kc_unsynced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError>;

    /// Unsynced rows under the retry limit whose retry delay has elapsed,
    /// ordered by retries desc, capped at `limit`.
    fn paranet_kc_sync_batch(
        &self,
        paranet_ual: &Ual,
        retries_limit: u32,
        retry_delay_ms: u64,
        limit: usize,
        now: Timestamp,
    ) -> Result<Vec<ParanetSyncRecord>, StorageError>;

    fn paranet_kc_mark_synced(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    fn paranet_kc_increment_retries(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        error_message: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError>;

    fn paranet_kc_record(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
    ) -> Result<Option<ParanetSyncRecord>, StorageError>;
}
