use std::time::Duration;

// ─── Command Executor ────────────────────────────────────────────────────────

/// Maximum number of commands executing concurrently.
pub const COMMAND_QUEUE_PARALLELISM: usize = 100;

/// How often the executor rechecks the store for ready commands.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Finished one-shot commands older than this are purged.
pub const FINALIZED_COMMAND_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Period of the commands cleanup job.
pub const COMMANDS_CLEANUP_FREQUENCY: Duration = Duration::from_secs(60 * 60);

/// Priority assigned when a template does not specify one.
pub const DEFAULT_COMMAND_PRIORITY: i64 = 5;

// ─── Network Protocol ────────────────────────────────────────────────────────

/// Peers contacted concurrently per GET round.
pub const GET_BATCH_SIZE: usize = 5;

/// Distinct confirmations required to accept a GET result.
pub const GET_MIN_ACK_RESPONSES: usize = 1;

/// Peers contacted concurrently per PUBLISH round.
pub const PUBLISH_BATCH_SIZE: usize = 20;

/// Default PUBLISH quorum when the chain does not report one.
pub const PUBLISH_MIN_ACK_RESPONSES: usize = 3;

/// Peers contacted concurrently per UPDATE round.
pub const UPDATE_BATCH_SIZE: usize = 20;

/// Default UPDATE quorum when the chain does not report one.
pub const UPDATE_MIN_ACK_RESPONSES: usize = 3;

/// Upper bound on a single peer round-trip.
pub const PEER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Result message stored when no peer could serve an assertion.
pub const NOT_FOUND_MESSAGE: &str = "Unable to find assertion on the network!";

// ─── Paranet Sync ────────────────────────────────────────────────────────────

/// Period of each paranet's reconciliation job.
pub const PARANET_SYNC_FREQUENCY: Duration = Duration::from_secs(60);

/// Maximum rows synced per run; also the run's concurrency bound.
pub const PARANET_SYNC_KC_COUNT: usize = 50;

/// Rows that failed this many times are never selected again.
pub const PARANET_SYNC_RETRIES_LIMIT: u32 = 3;

/// Minimum time between two attempts on a failed row.
pub const PARANET_SYNC_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bounded poll attempts while waiting for a GET to settle.
pub const GET_RESULT_POLLING_MAX_ATTEMPTS: u32 = 300;

/// Interval between two GET polls.
pub const GET_RESULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// Locators fetched per membership page.
pub const PARANET_MEMBERSHIP_PAGE_SIZE: u64 = 50;
