use std::sync::Mutex;

use borsh::BorshDeserialize;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use trellis_types::command::{Command, CommandData, CommandId, CommandName, CommandStatus};
use trellis_types::operation::{Operation, OperationId, OperationResult, OperationStatus};
use trellis_types::paranet::ParanetSyncRecord;
use trellis_types::primitives::Timestamp;
use trellis_types::ual::Ual;

use crate::error::StorageError;
use crate::traits::{CommandRepository, OperationRepository, ParanetKcRepository};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    data TEXT NOT NULL,
    sequence TEXT NOT NULL,
    delay_ms INTEGER NOT NULL,
    period_ms INTEGER NOT NULL,
    retries INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    is_blocking INTEGER NOT NULL,
    transactional INTEGER NOT NULL,
    status TEXT NOT NULL,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS commands_ready_idx ON commands (status, priority, created_at);

CREATE TABLE IF NOT EXISTS operations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    blockchain TEXT NOT NULL,
    status TEXT NOT NULL,
    result BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS paranet_kc (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paranet_ual TEXT NOT NULL,
    ual TEXT NOT NULL,
    blockchain_id TEXT NOT NULL,
    is_synced INTEGER NOT NULL DEFAULT 0,
    retries INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (ual, paranet_ual)
);
CREATE INDEX IF NOT EXISTS paranet_kc_sync_idx
    ON paranet_kc (paranet_ual, is_synced, retries, updated_at);
";

const COMMAND_COLUMNS: &str = "id, name, data, sequence, delay_ms, period_ms, retries, priority, \
     is_blocking, transactional, status, last_error, created_at, started_at, updated_at";

const KC_COLUMNS: &str =
    "paranet_ual, ual, blockchain_id, is_synced, retries, error_message, created_at, updated_at";

/// SQLite-backed repository for commands, operations and paranet sync rows.
///
/// Every conditional transition is a single `UPDATE ... WHERE status = ?`,
/// so the affected-row count is the answer to "did this caller win".
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) a repository at the given path.
    /// Use `:memory:` for an in-memory database (useful for tests).
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::WriteError {
            reason: e.to_string(),
        })?;
        f(&conn)
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        f(&conn)
    }

    fn query_commands(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Command>, StorageError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, CommandRow::from_row)?;
        let mut commands = Vec::new();
        for row in rows {
            commands.push(row?.into_command()?);
        }
        Ok(commands)
    }
}

/// Raw column values of a `commands` row, before domain parsing.
struct CommandRow {
    id: String,
    name: String,
    data: String,
    sequence: String,
    delay_ms: i64,
    period_ms: i64,
    retries: i64,
    priority: i64,
    is_blocking: bool,
    transactional: bool,
    status: String,
    last_error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    updated_at: i64,
}

impl CommandRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            data: row.get(2)?,
            sequence: row.get(3)?,
            delay_ms: row.get(4)?,
            period_ms: row.get(5)?,
            retries: row.get(6)?,
            priority: row.get(7)?,
            is_blocking: row.get(8)?,
            transactional: row.get(9)?,
            status: row.get(10)?,
            last_error: row.get(11)?,
            created_at: row.get(12)?,
            started_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_command(self) -> Result<Command, StorageError> {
        let id = Uuid::parse_str(&self.id).map_err(|e| StorageError::DeserializationError {
            reason: format!("command id {}: {}", self.id, e),
        })?;
        let sequence: Vec<CommandName> = serde_json::from_str(&self.sequence).map_err(|e| {
            StorageError::DeserializationError {
                reason: format!("command sequence: {}", e),
            }
        })?;
        Ok(Command {
            id,
            name: self.name.parse()?,
            data: CommandData::from_json_str(&self.data)?,
            sequence,
            delay_ms: self.delay_ms as u64,
            period_ms: self.period_ms as u64,
            retries: self.retries as u32,
            priority: self.priority,
            is_blocking: self.is_blocking,
            transactional: self.transactional,
            status: self.status.parse()?,
            last_error: self.last_error,
            created_at: self.created_at as Timestamp,
            started_at: self.started_at.map(|t| t as Timestamp),
            updated_at: self.updated_at as Timestamp,
        })
    }
}

struct KcRow {
    paranet_ual: String,
    ual: String,
    blockchain_id: String,
    is_synced: bool,
    retries: i64,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl KcRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            paranet_ual: row.get(0)?,
            ual: row.get(1)?,
            blockchain_id: row.get(2)?,
            is_synced: row.get(3)?,
            retries: row.get(4)?,
            error_message: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<ParanetSyncRecord, StorageError> {
        Ok(ParanetSyncRecord {
            paranet_ual: Ual::parse(&self.paranet_ual)?,
            ual: Ual::parse(&self.ual)?,
            blockchain_id: self.blockchain_id,
            is_synced: self.is_synced,
            retries: self.retries as u32,
            error_message: self.error_message,
            created_at: self.created_at as Timestamp,
            updated_at: self.updated_at as Timestamp,
        })
    }
}

impl CommandRepository for SqliteRepository {
    fn insert_command(&self, command: &Command) -> Result<(), StorageError> {
        let data = command.data.to_json_string()?;
        let sequence =
            serde_json::to_string(&command.sequence).map_err(|e| StorageError::SerializationError {
                reason: e.to_string(),
            })?;
        self.write(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO commands ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    COMMAND_COLUMNS
                ),
                params![
                    command.id.to_string(),
                    command.name.as_str(),
                    data,
                    sequence,
                    command.delay_ms as i64,
                    command.period_ms as i64,
                    command.retries as i64,
                    command.priority,
                    command.is_blocking,
                    command.transactional,
                    command.status.as_str(),
                    command.last_error,
                    command.created_at as i64,
                    command.started_at.map(|t| t as i64),
                    command.updated_at as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn get_command(&self, id: &CommandId) -> Result<Option<Command>, StorageError> {
        self.read(|conn| {
            let sql = format!("SELECT {} FROM commands WHERE id = ?1", COMMAND_COLUMNS);
            let row = conn
                .query_row(&sql, params![id.to_string()], CommandRow::from_row)
                .optional()?;
            row.map(CommandRow::into_command).transpose()
        })
    }

    fn ready_commands(&self, now: Timestamp, limit: usize) -> Result<Vec<Command>, StorageError> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM commands \
                 WHERE status = 'PENDING' AND created_at + delay_ms <= ?1 \
                   AND (period_ms = 0 OR started_at IS NULL OR ?1 - started_at >= period_ms) \
                 ORDER BY priority DESC, created_at ASC LIMIT ?2",
                COMMAND_COLUMNS
            );
            Self::query_commands(conn, &sql, params![now as i64, limit as i64])
        })
    }

    fn claim_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE commands SET status = 'RUNNING', started_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND status = 'PENDING'",
                params![id.to_string(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn transition_command(
        &self,
        id: &CommandId,
        from: CommandStatus,
        to: CommandStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE commands SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![id.to_string(), from.as_str(), to.as_str(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn retry_command(
        &self,
        id: &CommandId,
        error: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE commands SET status = 'PENDING', retries = MAX(retries - 1, 0), \
                 last_error = ?2, started_at = NULL, updated_at = ?3 \
                 WHERE id = ?1 AND status = 'RUNNING'",
                params![id.to_string(), error, now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn rearm_command(&self, id: &CommandId, now: Timestamp) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE commands SET status = 'PENDING', updated_at = ?2 \
                 WHERE id = ?1 AND status IN ('RUNNING', 'REPEATING')",
                params![id.to_string(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn fail_command(
        &self,
        id: &CommandId,
        error: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE commands SET status = 'FAILED', last_error = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND status = 'RUNNING'",
                params![id.to_string(), error, now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn commands_with_status(&self, status: CommandStatus) -> Result<Vec<Command>, StorageError> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM commands WHERE status = ?1 ORDER BY created_at ASC",
                COMMAND_COLUMNS
            );
            Self::query_commands(conn, &sql, params![status.as_str()])
        })
    }

    fn reset_interrupted_commands(&self, now: Timestamp) -> Result<usize, StorageError> {
        self.write(|conn| {
            Ok(conn.execute(
                "UPDATE commands SET status = 'PENDING', updated_at = ?1 WHERE status = 'RUNNING'",
                params![now as i64],
            )?)
        })
    }

    fn remove_finished_commands(&self, cutoff: Timestamp) -> Result<usize, StorageError> {
        self.write(|conn| {
            Ok(conn.execute(
                "DELETE FROM commands WHERE status IN ('COMPLETED', 'FAILED') \
                 AND period_ms = 0 AND updated_at < ?1",
                params![cutoff as i64],
            )?)
        })
    }
}

impl OperationRepository for SqliteRepository {
    fn create_operation(&self, operation: &Operation) -> Result<(), StorageError> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO operations \
                 (id, kind, blockchain, status, result, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
                params![
                    operation.id.to_string(),
                    operation.kind.as_str(),
                    operation.blockchain,
                    operation.status.as_str(),
                    operation.created_at as i64,
                    operation.updated_at as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, StorageError> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT kind, blockchain, status, created_at, updated_at \
                     FROM operations WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((kind, blockchain, status, created_at, updated_at)) => Ok(Some(Operation {
                    id: *id,
                    kind: kind.parse()?,
                    blockchain,
                    status: status.parse()?,
                    created_at: created_at as Timestamp,
                    updated_at: updated_at as Timestamp,
                })),
                None => Ok(None),
            }
        })
    }

    fn update_operation_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE operations SET status = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND status NOT IN ('COMPLETED', 'FAILED')",
                params![id.to_string(), status.as_str(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn restart_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE operations SET status = ?2, updated_at = ?3, result = NULL WHERE id = ?1",
                params![id.to_string(), status.as_str(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn cached_operation_result(
        &self,
        id: &OperationId,
    ) -> Result<Option<OperationResult>, StorageError> {
        let blob: Option<Vec<u8>> = self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT result FROM operations WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get::<_, Option<Vec<u8>>>(0),
                )
                .optional()?;
            Ok(row.flatten())
        })?;
        blob.map(|bytes| {
            OperationResult::try_from_slice(&bytes).map_err(|e| {
                StorageError::DeserializationError {
                    reason: e.to_string(),
                }
            })
        })
        .transpose()
    }

    fn finish_operation(
        &self,
        id: &OperationId,
        status: OperationStatus,
        result: &OperationResult,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        let blob = borsh::to_vec(result).map_err(|e| StorageError::SerializationError {
            reason: e.to_string(),
        })?;
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE operations SET status = ?2, result = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND status NOT IN ('COMPLETED', 'FAILED')",
                params![id.to_string(), status.as_str(), blob, now as i64],
            )?;
            if changed == 1 {
                return Ok(true);
            }
            let exists = conn
                .query_row(
                    "SELECT 1 FROM operations WHERE id = ?1",
                    params![id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            match exists {
                Some(()) => Ok(false),
                None => Err(StorageError::NotFound {
                    key: format!("operation {}", id),
                }),
            }
        })
    }
}

impl ParanetKcRepository for SqliteRepository {
    fn create_paranet_kc_records(
        &self,
        paranet_ual: &Ual,
        blockchain_id: &str,
        uals: &[Ual],
        now: Timestamp,
    ) -> Result<usize, StorageError> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut created = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO paranet_kc \
                     (paranet_ual, ual, blockchain_id, is_synced, retries, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)",
                )?;
                for ual in uals {
                    created += stmt.execute(params![
                        paranet_ual.to_string(),
                        ual.to_string(),
                        blockchain_id,
                        now as i64
                    ])?;
                }
            }
            tx.commit()?;
            Ok(created)
        })
    }

    fn paranet_kc_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM paranet_kc WHERE paranet_ual = ?1",
                params![paranet_ual.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn paranet_kc_synced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM paranet_kc WHERE paranet_ual = ?1 AND is_synced = 1",
                params![paranet_ual.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn paranet_kc_unsynced_count(&self, paranet_ual: &Ual) -> Result<u64, StorageError> {
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM paranet_kc WHERE paranet_ual = ?1 AND is_synced = 0",
                params![paranet_ual.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn paranet_kc_sync_batch(
        &self,
        paranet_ual: &Ual,
        retries_limit: u32,
        retry_delay_ms: u64,
        limit: usize,
        now: Timestamp,
    ) -> Result<Vec<ParanetSyncRecord>, StorageError> {
        let retry_before = now.saturating_sub(retry_delay_ms) as i64;
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM paranet_kc \
                 WHERE paranet_ual = ?1 AND is_synced = 0 AND retries < ?2 \
                   AND (retries = 0 OR updated_at <= ?3) \
                 ORDER BY retries DESC, created_at ASC, id ASC LIMIT ?4",
                KC_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                params![
                    paranet_ual.to_string(),
                    retries_limit as i64,
                    retry_before,
                    limit as i64
                ],
                KcRow::from_row,
            )?;
            let mut batch = Vec::new();
            for row in rows {
                batch.push(row?.into_record()?);
            }
            Ok(batch)
        })
    }

    fn paranet_kc_mark_synced(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE paranet_kc SET is_synced = 1, updated_at = ?3 \
                 WHERE paranet_ual = ?1 AND ual = ?2",
                params![paranet_ual.to_string(), ual.to_string(), now as i64],
            )?;
            Ok(changed == 1)
        })
    }

    fn paranet_kc_increment_retries(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
        error_message: &str,
        now: Timestamp,
    ) -> Result<bool, StorageError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE paranet_kc SET retries = retries + 1, error_message = ?3, updated_at = ?4 \
                 WHERE paranet_ual = ?1 AND ual = ?2",
                params![
                    paranet_ual.to_string(),
                    ual.to_string(),
                    error_message,
                    now as i64
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn paranet_kc_record(
        &self,
        paranet_ual: &Ual,
        ual: &Ual,
    ) -> Result<Option<ParanetSyncRecord>, StorageError> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM paranet_kc WHERE paranet_ual = ?1 AND ual = ?2",
                KC_COLUMNS
            );
            let row = conn
                .query_row(
                    &sql,
                    params![paranet_ual.to_string(), ual.to_string()],
                    KcRow::from_row,
                )
                .optional()?;
            row.map(KcRow::into_record).transpose()
        })
    }
}
