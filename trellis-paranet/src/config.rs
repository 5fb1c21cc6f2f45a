use std::time::Duration;

use serde::{Deserialize, Serialize};

use trellis_types::constants::{
    GET_RESULT_POLLING_INTERVAL, GET_RESULT_POLLING_MAX_ATTEMPTS, PARANET_MEMBERSHIP_PAGE_SIZE,
    PARANET_SYNC_FREQUENCY, PARANET_SYNC_KC_COUNT, PARANET_SYNC_RETRIES_LIMIT,
    PARANET_SYNC_RETRY_DELAY,
};
use trellis_types::paranet::Paranet;

/// Reconciler tuning and the paranets to follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParanetSyncConfig {
    /// Period of each paranet's sync command.
    pub sync_frequency_ms: u64,
    /// Rows synced per run; also the run's concurrency bound.
    pub batch_size: usize,
    pub retries_limit: u32,
    pub retry_delay_ms: u64,
    /// Polls of a GET result before the attempt is abandoned.
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Membership locators fetched per chain call.
    pub page_size: u64,
    pub paranets: Vec<Paranet>,
}

impl ParanetSyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ParanetSyncConfig {
    fn default() -> Self {
        Self {
            sync_frequency_ms: PARANET_SYNC_FREQUENCY.as_millis() as u64,
            batch_size: PARANET_SYNC_KC_COUNT,
            retries_limit: PARANET_SYNC_RETRIES_LIMIT,
            retry_delay_ms: PARANET_SYNC_RETRY_DELAY.as_millis() as u64,
            poll_attempts: GET_RESULT_POLLING_MAX_ATTEMPTS,
            poll_interval_ms: GET_RESULT_POLLING_INTERVAL.as_millis() as u64,
            page_size: PARANET_MEMBERSHIP_PAGE_SIZE,
            paranets: Vec::new(),
        }
    }
}
