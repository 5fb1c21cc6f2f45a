use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use trellis_command::executor::ExecutorStats;
use trellis_paranet::command::SyncStats;
use trellis_protocol::coordinator::CoordinatorStats;

/// Node-wide Prometheus metrics.
pub struct NodeMetrics {
    pub commands_executed: Counter,
    pub commands_failed: Counter,
    pub commands_retried: Counter,
    pub operations_completed: Counter,
    pub operations_not_found: Counter,
    pub operations_failed: Counter,
    pub paranet_rows_synced: Counter,
    pub paranet_rows_failed: Counter,
    pub open_tallies: Gauge,
    pub registry: Registry,
}

impl NodeMetrics {
    /// Create a new metrics registry with all node metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let commands_executed = Counter::default();
        let commands_failed = Counter::default();
        let commands_retried = Counter::default();
        let operations_completed = Counter::default();
        let operations_not_found = Counter::default();
        let operations_failed = Counter::default();
        let paranet_rows_synced = Counter::default();
        let paranet_rows_failed = Counter::default();
        let open_tallies = Gauge::default();

        registry.register(
            "trellis_commands_executed",
            "Commands run by the executor",
            commands_executed.clone(),
        );
        registry.register(
            "trellis_commands_failed",
            "Commands that ended FAILED",
            commands_failed.clone(),
        );
        registry.register(
            "trellis_commands_retried",
            "Command attempts re-queued after an error",
            commands_retried.clone(),
        );
        registry.register(
            "trellis_operations_completed",
            "Network operations that reached quorum",
            operations_completed.clone(),
        );
        registry.register(
            "trellis_operations_not_found",
            "GET operations that exhausted every peer",
            operations_not_found.clone(),
        );
        registry.register(
            "trellis_operations_failed",
            "Publish or update operations that missed quorum",
            operations_failed.clone(),
        );
        registry.register(
            "trellis_paranet_rows_synced",
            "Paranet collections fully replicated",
            paranet_rows_synced.clone(),
        );
        registry.register(
            "trellis_paranet_rows_failed",
            "Failed paranet collection sync attempts",
            paranet_rows_failed.clone(),
        );
        registry.register(
            "trellis_open_tallies",
            "Keywords currently awaiting peer replies",
            open_tallies.clone(),
        );

        Self {
            commands_executed,
            commands_failed,
            commands_retried,
            operations_completed,
            operations_not_found,
            operations_failed,
            paranet_rows_synced,
            paranet_rows_failed,
            open_tallies,
            registry,
        }
    }

    /// Pull the running totals kept by each component.
    pub fn observe(
        &self,
        executor: &ExecutorStats,
        coordinator: &CoordinatorStats,
        sync: &SyncStats,
        open_tallies: usize,
    ) {
        advance(&self.commands_executed, executor.executed());
        advance(&self.commands_failed, executor.failed());
        advance(&self.commands_retried, executor.retried());
        advance(&self.operations_completed, coordinator.completed());
        advance(&self.operations_not_found, coordinator.not_found());
        advance(&self.operations_failed, coordinator.failed());
        advance(&self.paranet_rows_synced, sync.synced());
        advance(&self.paranet_rows_failed, sync.failed());
        self.open_tallies.set(open_tallies as i64);
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buf, &self.registry) {
            tracing::warn!("failed to encode metrics: {}", e);
        }
        buf
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Move a counter up to a component's running total. Totals never shrink.
fn advance(counter: &Counter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = NodeMetrics::new();
        metrics.commands_executed.inc();
        metrics.open_tallies.set(3);

        let encoded = metrics.encode();
        assert!(encoded.contains("trellis_commands_executed"));
        assert!(encoded.contains("trellis_open_tallies 3"));
        assert!(encoded.contains("trellis_paranet_rows_synced"));
    }

    #[test]
    fn test_observe_is_idempotent() {
        let metrics = NodeMetrics::new();
        let executor = ExecutorStats::default();
        let coordinator = CoordinatorStats::default();
        let sync = SyncStats::default();

        metrics.observe(&executor, &coordinator, &sync, 2);
        metrics.observe(&executor, &coordinator, &sync, 0);

        assert_eq!(metrics.commands_executed.get(), 0);
        assert_eq!(metrics.open_tallies.get(), 0);
    }

    #[test]
    fn test_advance_only_moves_forward() {
        let counter = Counter::default();
        advance(&counter, 5);
        advance(&counter, 5);
        assert_eq!(counter.get(), 5);
        advance(&counter, 2);
        assert_eq!(counter.get(), 5);
        advance(&counter, 9);
        assert_eq!(counter.get(), 9);
    }
}
