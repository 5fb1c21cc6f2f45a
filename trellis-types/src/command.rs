use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{
    COMMANDS_CLEANUP_FREQUENCY, DEFAULT_COMMAND_PRIORITY, PARANET_SYNC_FREQUENCY,
};
use crate::error::TypesError;
use crate::operation::OperationId;
use crate::primitives::Timestamp;

/// Unique identifier of a persisted command.
pub type CommandId = Uuid;

/// Closed set of command kinds the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "networkGetCommand")]
    NetworkGet,
    #[serde(rename = "curatedParanetNetworkGetCommand")]
    CuratedParanetNetworkGet,
    #[serde(rename = "networkPublishCommand")]
    NetworkPublish,
    #[serde(rename = "networkUpdateCommand")]
    NetworkUpdate,
    #[serde(rename = "scheduleMessagesCommand")]
    ScheduleMessages,
    #[serde(rename = "localGetCommand")]
    LocalGet,
    #[serde(rename = "storeAssertionCommand")]
    StoreAssertion,
    #[serde(rename = "paranetSyncCommand")]
    ParanetSync,
    #[serde(rename = "commandsCleanupCommand")]
    CommandsCleanup,
}

impl CommandName {
    pub const ALL: [CommandName; 9] = [
        CommandName::NetworkGet,
        CommandName::CuratedParanetNetworkGet,
        CommandName::NetworkPublish,
        CommandName::NetworkUpdate,
        CommandName::ScheduleMessages,
        CommandName::LocalGet,
        CommandName::StoreAssertion,
        CommandName::ParanetSync,
        CommandName::CommandsCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::NetworkGet => "networkGetCommand",
            CommandName::CuratedParanetNetworkGet => "curatedParanetNetworkGetCommand",
            CommandName::NetworkPublish => "networkPublishCommand",
            CommandName::NetworkUpdate => "networkUpdateCommand",
            CommandName::ScheduleMessages => "scheduleMessagesCommand",
            CommandName::LocalGet => "localGetCommand",
            CommandName::StoreAssertion => "storeAssertionCommand",
            CommandName::ParanetSync => "paranetSyncCommand",
            CommandName::CommandsCleanup => "commandsCleanupCommand",
        }
    }

    /// Whether a command of this kind is meaningless without a payload.
    pub fn requires_payload(&self) -> bool {
        !matches!(self, CommandName::CommandsCleanup)
    }

    /// Static defaults for a freshly built command of this kind.
    pub fn template(&self) -> CommandTemplate {
        let base = CommandTemplate::default();
        match self {
            CommandName::StoreAssertion => CommandTemplate {
                transactional: true,
                ..base
            },
            CommandName::ScheduleMessages => CommandTemplate {
                priority: DEFAULT_COMMAND_PRIORITY + 1,
                ..base
            },
            CommandName::ParanetSync => CommandTemplate {
                period_ms: PARANET_SYNC_FREQUENCY.as_millis() as u64,
                ..base
            },
            CommandName::CommandsCleanup => CommandTemplate {
                period_ms: COMMANDS_CLEANUP_FREQUENCY.as_millis() as u64,
                priority: DEFAULT_COMMAND_PRIORITY - 1,
                ..base
            },
            _ => base,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .iter()
            .find(|name| name.as_str() == s)
            .copied()
            .ok_or_else(|| TypesError::UnknownCommand {
                name: s.to_string(),
            })
    }
}

/// Lifecycle state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Repeating,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Running => "RUNNING",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Repeating => "REPEATING",
        }
    }

    /// Whether the command has reached a state it never leaves.
    pub fn is_finished(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "RUNNING" => Ok(CommandStatus::Running),
            "COMPLETED" => Ok(CommandStatus::Completed),
            "FAILED" => Ok(CommandStatus::Failed),
            "REPEATING" => Ok(CommandStatus::Repeating),
            other => Err(TypesError::UnknownVariant {
                kind: "command status",
                value: other.to_string(),
            }),
        }
    }
}

/// Opaque structured payload carried by a command.
///
/// Always a JSON object. Handlers decode it into their own request types;
/// sequence continuation merges payloads key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandData(Map<String, Value>);

impl CommandData {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an arbitrary JSON value, rejecting anything but an object.
    pub fn from_value(value: Value) -> Result<Self, TypesError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TypesError::InvalidPayload {
                reason: format!("expected a JSON object, got {}", other),
            }),
        }
    }

    /// Serialize a typed request into a payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, TypesError> {
        let json = serde_json::to_value(value).map_err(|e| TypesError::InvalidPayload {
            reason: e.to_string(),
        })?;
        Self::from_value(json)
    }

    /// Decode the payload into a typed request.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TypesError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            TypesError::InvalidPayload {
                reason: e.to_string(),
            }
        })
    }

    /// Overlay `other` on top of this payload; keys in `other` win.
    pub fn merge(&mut self, other: &CommandData) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `operationId` field most payloads carry, if present and valid.
    pub fn operation_id(&self) -> Option<OperationId> {
        self.0
            .get("operationId")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn to_json_string(&self) -> Result<String, TypesError> {
        serde_json::to_string(&self.0).map_err(|e| TypesError::InvalidPayload {
            reason: e.to_string(),
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self, TypesError> {
        let value: Value = serde_json::from_str(s).map_err(|e| TypesError::InvalidPayload {
            reason: e.to_string(),
        })?;
        Self::from_value(value)
    }
}

/// Scheduling defaults attached to a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub delay_ms: u64,
    /// 0 means one-shot.
    pub period_ms: u64,
    pub retries: u32,
    pub priority: i64,
    pub is_blocking: bool,
    pub transactional: bool,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            period_ms: 0,
            retries: 0,
            priority: DEFAULT_COMMAND_PRIORITY,
            is_blocking: false,
            transactional: false,
        }
    }
}

/// A durable, retryable, optionally recurring unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub name: CommandName,
    pub data: CommandData,
    /// Follow-up stages, run in order once this one reports `Continue`.
    pub sequence: Vec<CommandName>,
    pub delay_ms: u64,
    pub period_ms: u64,
    /// Remaining retry budget.
    pub retries: u32,
    pub priority: i64,
    pub is_blocking: bool,
    /// Failures may leave partial side effects behind; never blind-retry.
    pub transactional: bool,
    pub status: CommandStatus,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    /// Start of the most recent run; doubles as "last run" for recurring commands.
    pub started_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Command {
    /// Build a pending command from the kind's template.
    pub fn new(name: CommandName, data: CommandData, now: Timestamp) -> Self {
        let template = name.template();
        Self {
            id: Uuid::new_v4(),
            name,
            data,
            sequence: Vec::new(),
            delay_ms: template.delay_ms,
            period_ms: template.period_ms,
            retries: template.retries,
            priority: template.priority,
            is_blocking: template.is_blocking,
            transactional: template.transactional,
            status: CommandStatus::Pending,
            last_error: None,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    pub fn with_sequence(mut self, sequence: Vec<CommandName>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_period(mut self, period_ms: u64) -> Self {
        self.period_ms = period_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.is_blocking = is_blocking;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.period_ms > 0
    }

    /// Whether a pending command may be claimed at `now`.
    pub fn is_ready(&self, now: Timestamp) -> bool {
        if self.status != CommandStatus::Pending {
            return false;
        }
        if now < self.created_at.saturating_add(self.delay_ms) {
            return false;
        }
        match (self.period_ms, self.started_at) {
            (0, _) | (_, None) => true,
            (period, Some(last_run)) => now.saturating_sub(last_run) >= period,
        }
    }

    /// Build the next stage of this command's sequence, if any.
    ///
    /// The follow-up inherits this command's payload overlaid with `extra`
    /// and the remainder of the sequence.
    pub fn next_in_sequence(&self, extra: &CommandData, now: Timestamp) -> Option<Command> {
        let (next, rest) = self.sequence.split_first()?;
        let mut data = self.data.clone();
        data.merge(extra);
        Some(Command::new(*next, data, now).with_sequence(rest.to_vec()))
    }
}
