use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use trellis_types::command::{Command, CommandStatus};
use trellis_types::constants::{COMMAND_POLL_INTERVAL, COMMAND_QUEUE_PARALLELISM};
use trellis_types::primitives::now_millis;

use crate::error::CommandError;
use crate::handler::{CommandHandler, CommandOutcome};
use crate::registry::HandlerRegistry;
use crate::scheduler::Scheduler;

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Commands allowed to run at once.
    pub max_workers: usize,
    /// Fallback recheck interval when nothing wakes the executor.
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: COMMAND_QUEUE_PARALLELISM,
            poll_interval: COMMAND_POLL_INTERVAL,
        }
    }
}

/// Running totals, read by the metrics exporter.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    executed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    repeated: AtomicU64,
}

impl ExecutorStats {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn repeated(&self) -> u64 {
        self.repeated.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Claims ready commands and runs them on a bounded worker pool.
pub struct CommandExecutor {
    scheduler: Scheduler,
    registry: Arc<HandlerRegistry>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    poll_interval: Duration,
    stats: Arc<ExecutorStats>,
}

impl CommandExecutor {
    pub fn new(scheduler: Scheduler, registry: HandlerRegistry, config: ExecutorConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            scheduler,
            registry: Arc::new(registry),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            poll_interval: config.poll_interval,
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ExecutorStats> {
        self.stats.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Main loop. Returns once `shutdown` flips to true and every running
    /// command has finished.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), CommandError> {
        let reset = self
            .scheduler
            .repository()
            .reset_interrupted_commands(now_millis())?;
        if reset > 0 {
            info!(count = reset, "reset commands interrupted by a previous shutdown");
        }

        let wake = self.scheduler.wake_signal();
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(
            max_workers = self.max_workers,
            handlers = self.registry.names().len(),
            "command executor started"
        );

        loop {
            if let Err(e) = self.dispatch_ready().await {
                error!(error = %e, "failed to dispatch ready commands");
            }
            tokio::select! {
                _ = wake.notified() => {}
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.wait_idle().await;
        info!("command executor stopped");
        Ok(())
    }

    /// Claim and start every command ready right now, up to the free
    /// worker count. Returns how many were started.
    pub async fn dispatch_ready(self: &Arc<Self>) -> Result<usize, CommandError> {
        let limit = self.workers.available_permits().max(1);
        let ready = self
            .scheduler
            .repository()
            .ready_commands(now_millis(), limit)?;

        let mut started = 0;
        for command in ready {
            if command.is_blocking {
                // Waits for every in-flight command, then runs with the pool to itself.
                let _all = self
                    .workers
                    .clone()
                    .acquire_many_owned(self.max_workers as u32)
                    .await
                    .map_err(|e| CommandError::handler(format!("worker pool closed: {}", e)))?;
                if !self.claim(&command)? {
                    continue;
                }
                self.run_command(command).await;
            } else {
                let permit = self
                    .workers
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| CommandError::handler(format!("worker pool closed: {}", e)))?;
                if !self.claim(&command)? {
                    continue;
                }
                let this = self.clone();
                tokio::spawn(async move {
                    this.run_command(command).await;
                    drop(permit);
                });
            }
            started += 1;
        }
        Ok(started)
    }

    /// Keep dispatching until nothing is ready and no worker is busy.
    pub async fn drain(self: &Arc<Self>) -> Result<(), CommandError> {
        loop {
            let started = self.dispatch_ready().await?;
            self.wait_idle().await;
            if started == 0 {
                return Ok(());
            }
        }
    }

    async fn wait_idle(&self) {
        if let Ok(all) = self.workers.acquire_many(self.max_workers as u32).await {
            drop(all);
        }
    }

    fn claim(&self, command: &Command) -> Result<bool, CommandError> {
        let claimed = self
            .scheduler
            .repository()
            .claim_command(&command.id, now_millis())?;
        if !claimed {
            debug!(command_id = %command.id, "command already claimed elsewhere");
        }
        Ok(claimed)
    }

    async fn run_command(&self, command: Command) {
        let Some(handler) = self.registry.get(command.name) else {
            let err = CommandError::NoHandler { name: command.name };
            error!(command = %command.name, command_id = %command.id, "{}", err);
            if let Err(e) = self.mark_failed(&command, &err.to_string()) {
                error!(command_id = %command.id, error = %e, "failed to persist command state");
            }
            return;
        };

        debug!(command = %command.name, command_id = %command.id, "executing command");
        let result = {
            let handler = handler.clone();
            let cmd = command.clone();
            match tokio::spawn(async move { handler.execute(&cmd).await }).await {
                Ok(result) => result,
                Err(join) => Err(CommandError::handler(format!("handler panicked: {}", join))),
            }
        };

        let applied = match result {
            Ok(outcome) => self.apply_outcome(&command, outcome),
            Err(err) => self.handle_failure(handler, &command, err).await,
        };
        if let Err(e) = applied {
            error!(
                command = %command.name,
                command_id = %command.id,
                error = %e,
                "failed to persist command state"
            );
        }
    }

    fn apply_outcome(&self, command: &Command, outcome: CommandOutcome) -> Result<(), CommandError> {
        let repo = self.scheduler.repository();
        let now = now_millis();
        match outcome {
            CommandOutcome::Continue(next) => {
                for follow_up in next {
                    self.scheduler.add_command(follow_up)?;
                }
                repo.transition_command(
                    &command.id,
                    CommandStatus::Running,
                    CommandStatus::Completed,
                    now,
                )?;
            }
            CommandOutcome::Repeat if command.is_recurring() => {
                repo.transition_command(
                    &command.id,
                    CommandStatus::Running,
                    CommandStatus::Repeating,
                    now,
                )?;
                repo.rearm_command(&command.id, now)?;
                ExecutorStats::bump(&self.stats.repeated);
            }
            CommandOutcome::Repeat => {
                warn!(
                    command = %command.name,
                    command_id = %command.id,
                    "one-shot command asked to repeat, completing it instead"
                );
                repo.transition_command(
                    &command.id,
                    CommandStatus::Running,
                    CommandStatus::Completed,
                    now,
                )?;
            }
            CommandOutcome::Empty => {
                repo.transition_command(
                    &command.id,
                    CommandStatus::Running,
                    CommandStatus::Completed,
                    now,
                )?;
            }
        }
        ExecutorStats::bump(&self.stats.executed);
        Ok(())
    }

    async fn handle_failure(
        &self,
        handler: Arc<dyn CommandHandler>,
        command: &Command,
        err: CommandError,
    ) -> Result<(), CommandError> {
        let message = err.to_string();

        if !err.is_validation() && !command.transactional && command.retries > 0 {
            warn!(
                command = %command.name,
                command_id = %command.id,
                retries_left = command.retries - 1,
                error = %message,
                "command failed, retrying"
            );
            self.scheduler
                .repository()
                .retry_command(&command.id, &message, now_millis())?;
            ExecutorStats::bump(&self.stats.retried);
            self.scheduler.wake_signal().notify_one();
            return Ok(());
        }

        let exhausted = !err.is_validation() && !command.transactional;
        let err = if exhausted {
            CommandError::RetryBudgetExhausted {
                name: command.name,
                reason: message.clone(),
            }
        } else {
            err
        };

        let cmd = command.clone();
        let recovery = tokio::spawn(async move {
            if exhausted {
                handler.retry_finished(&cmd, &err).await
            } else {
                handler.recover(&cmd, &err).await
            }
        })
        .await;
        let outcome = match recovery {
            Ok(outcome) => outcome,
            Err(join) => {
                error!(command_id = %command.id, error = %join, "recovery routine panicked");
                CommandOutcome::Empty
            }
        };

        match outcome {
            CommandOutcome::Repeat if command.is_recurring() => {
                warn!(
                    command = %command.name,
                    command_id = %command.id,
                    error = %message,
                    "recurring command failed, re-armed for next period"
                );
                self.scheduler
                    .repository()
                    .rearm_command(&command.id, now_millis())?;
                ExecutorStats::bump(&self.stats.repeated);
                Ok(())
            }
            CommandOutcome::Continue(next) => {
                for follow_up in next {
                    self.scheduler.add_command(follow_up)?;
                }
                self.mark_failed(command, &message)
            }
            _ => self.mark_failed(command, &message),
        }
    }

    fn mark_failed(&self, command: &Command, message: &str) -> Result<(), CommandError> {
        error!(
            command = %command.name,
            command_id = %command.id,
            error = %message,
            "command failed"
        );
        self.scheduler
            .repository()
            .fail_command(&command.id, message, now_millis())?;
        ExecutorStats::bump(&self.stats.failed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::continue_sequence;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use trellis_storage::memory::MemoryRepository;
    use trellis_types::command::{CommandData, CommandId, CommandName};

    #[derive(Clone, Copy)]
    enum Fail {
        Never,
        Times(usize),
        Always,
        Validation,
        Panic,
    }

    struct Recorder {
        name: CommandName,
        fail: Fail,
        outcome: CommandOutcome,
        recover_outcome: CommandOutcome,
        sequence_data: Option<CommandData>,
        delay: Duration,
        calls: AtomicUsize,
        recovered: Mutex<Vec<String>>,
        seen: Mutex<Vec<CommandData>>,
        gauge: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new(name: CommandName) -> Self {
            Self {
                name,
                fail: Fail::Never,
                outcome: CommandOutcome::Empty,
                recover_outcome: CommandOutcome::Empty,
                sequence_data: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                recovered: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
                gauge: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        fn name(&self) -> CommandName {
            self.name
        }

        async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(command.data.clone());
            let now = self.gauge.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.gauge.fetch_sub(1, Ordering::SeqCst);

            match self.fail {
                Fail::Times(n) if call < n => return Err(CommandError::handler("flaky")),
                Fail::Always => return Err(CommandError::handler("broken")),
                Fail::Validation => return Err(CommandError::validation("bad payload")),
                Fail::Panic => panic!("handler blew up"),
                _ => {}
            }
            match &self.sequence_data {
                Some(extra) => Ok(continue_sequence(command, extra)),
                None => Ok(self.outcome.clone()),
            }
        }

        async fn recover(&self, _command: &Command, error: &CommandError) -> CommandOutcome {
            self.recovered.lock().unwrap().push(error.to_string());
            self.recover_outcome.clone()
        }
    }

    fn payload() -> CommandData {
        CommandData::from_value(json!({"operationId": "op-1"})).unwrap()
    }

    fn executor(handlers: Vec<Arc<Recorder>>, max_workers: usize) -> Arc<CommandExecutor> {
        let scheduler = Scheduler::new(Arc::new(MemoryRepository::new()));
        let mut registry = HandlerRegistry::new();
        for h in handlers {
            registry.register(h);
        }
        Arc::new(CommandExecutor::new(
            scheduler,
            registry,
            ExecutorConfig {
                max_workers,
                poll_interval: Duration::from_millis(10),
            },
        ))
    }

    fn status(executor: &CommandExecutor, id: &CommandId) -> CommandStatus {
        executor
            .scheduler()
            .repository()
            .get_command(id)
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_success_completes() {
        let handler = Arc::new(Recorder::new(CommandName::LocalGet));
        let exec = executor(vec![handler.clone()], 4);
        let id = exec.scheduler().add(CommandName::LocalGet, payload()).unwrap();
        exec.drain().await.unwrap();
        assert_eq!(status(&exec, &id), CommandStatus::Completed);
        assert_eq!(handler.calls(), 1);
        assert_eq!(exec.stats().executed(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let mut handler = Recorder::new(CommandName::LocalGet);
        handler.fail = Fail::Times(2);
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::LocalGet, payload(), now_millis()).with_retries(2);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Completed);
        assert_eq!(handler.calls(), 3);
        assert_eq!(exec.stats().retried(), 2);
        assert!(handler.recovered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_budget_calls_retry_finished() {
        let mut handler = Recorder::new(CommandName::LocalGet);
        handler.fail = Fail::Always;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::LocalGet, payload(), now_millis()).with_retries(1);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Failed);
        assert_eq!(handler.calls(), 2);
        let recovered = handler.recovered.lock().unwrap();
        assert_eq!(recovered.len(), 1);
        assert!(recovered[0].contains("retry budget exhausted"));
        let stored = exec.scheduler().repository().get_command(&id).unwrap().unwrap();
        assert!(stored.last_error.unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn test_transactional_failure_never_retries() {
        let mut handler = Recorder::new(CommandName::StoreAssertion);
        handler.fail = Fail::Always;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::StoreAssertion, payload(), now_millis()).with_retries(5);
        assert!(cmd.transactional);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Failed);
        assert_eq!(handler.calls(), 1);
        assert_eq!(handler.recovered.lock().unwrap().len(), 1);
        assert_eq!(exec.stats().retried(), 0);
    }

    #[tokio::test]
    async fn test_validation_error_never_retries() {
        let mut handler = Recorder::new(CommandName::LocalGet);
        handler.fail = Fail::Validation;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::LocalGet, payload(), now_millis()).with_retries(3);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Failed);
        assert_eq!(handler.calls(), 1);
        assert!(handler.recovered.lock().unwrap()[0].contains("bad payload"));
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order_with_merged_data() {
        let mut first = Recorder::new(CommandName::NetworkGet);
        first.sequence_data = Some(CommandData::from_value(json!({"batchSize": 4})).unwrap());
        let first = Arc::new(first);
        let second = Arc::new(Recorder::new(CommandName::ScheduleMessages));
        let exec = executor(vec![first.clone(), second.clone()], 4);

        let cmd = Command::new(CommandName::NetworkGet, payload(), now_millis())
            .with_sequence(vec![CommandName::ScheduleMessages]);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Completed);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        let seen = second.seen.lock().unwrap();
        assert_eq!(seen[0].get("batchSize"), Some(&json!(4)));
        assert_eq!(seen[0].get("operationId"), Some(&json!("op-1")));
    }

    #[tokio::test]
    async fn test_failed_stage_stops_sequence() {
        let mut first = Recorder::new(CommandName::NetworkGet);
        first.fail = Fail::Always;
        let first = Arc::new(first);
        let second = Arc::new(Recorder::new(CommandName::ScheduleMessages));
        let exec = executor(vec![first, second.clone()], 4);
        let cmd = Command::new(CommandName::NetworkGet, payload(), now_millis())
            .with_sequence(vec![CommandName::ScheduleMessages]);
        exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_recurring_repeat_is_rearmed_not_redispatched() {
        let mut handler = Recorder::new(CommandName::ParanetSync);
        handler.outcome = CommandOutcome::Repeat;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::ParanetSync, payload(), now_millis()).with_period(60_000);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        let stored = exec.scheduler().repository().get_command(&id).unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Pending);
        assert!(stored.started_at.is_some());
        assert_eq!(handler.calls(), 1);
        assert_eq!(exec.stats().repeated(), 1);
        assert!(!stored.is_ready(now_millis()));
    }

    #[tokio::test]
    async fn test_recurring_retry_skips_period_wait() {
        let mut handler = Recorder::new(CommandName::ParanetSync);
        handler.fail = Fail::Times(1);
        handler.outcome = CommandOutcome::Repeat;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::ParanetSync, payload(), now_millis())
            .with_period(60_000)
            .with_retries(1);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(handler.calls(), 2);
        assert_eq!(exec.stats().retried(), 1);
        assert_eq!(exec.stats().repeated(), 1);
        assert_eq!(status(&exec, &id), CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_recurring_empty_outcome_completes_for_good() {
        let handler = Arc::new(Recorder::new(CommandName::ParanetSync));
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::ParanetSync, payload(), now_millis()).with_period(1);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Completed);
        assert_eq!(handler.calls(), 1);
        assert_eq!(exec.stats().repeated(), 0);
    }

    #[tokio::test]
    async fn test_recover_repeat_rearms_recurring_command() {
        let mut handler = Recorder::new(CommandName::ParanetSync);
        handler.fail = Fail::Always;
        handler.recover_outcome = CommandOutcome::Repeat;
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 4);
        let cmd = Command::new(CommandName::ParanetSync, payload(), now_millis()).with_period(60_000);
        let id = exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Pending);
        assert_eq!(exec.stats().failed(), 0);
        assert_eq!(handler.recovered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let mut bad = Recorder::new(CommandName::LocalGet);
        bad.fail = Fail::Panic;
        let bad = Arc::new(bad);
        let good = Arc::new(Recorder::new(CommandName::NetworkGet));
        let exec = executor(vec![bad, good.clone()], 4);

        let bad_id = exec.scheduler().add(CommandName::LocalGet, payload()).unwrap();
        let good_id = exec.scheduler().add(CommandName::NetworkGet, payload()).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(status(&exec, &bad_id), CommandStatus::Failed);
        assert_eq!(status(&exec, &good_id), CommandStatus::Completed);
        let stored = exec.scheduler().repository().get_command(&bad_id).unwrap().unwrap();
        assert!(stored.last_error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_command() {
        let exec = executor(Vec::new(), 4);
        let id = exec.scheduler().add(CommandName::LocalGet, payload()).unwrap();
        exec.drain().await.unwrap();
        assert_eq!(status(&exec, &id), CommandStatus::Failed);
        assert_eq!(exec.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let mut handler = Recorder::new(CommandName::LocalGet);
        handler.delay = Duration::from_millis(20);
        let handler = Arc::new(handler);
        let exec = executor(vec![handler.clone()], 2);
        for _ in 0..6 {
            exec.scheduler().add(CommandName::LocalGet, payload()).unwrap();
        }
        exec.drain().await.unwrap();
        assert_eq!(handler.calls(), 6);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_blocking_command_runs_alone() {
        let gauge = Arc::new(AtomicUsize::new(0));
        let mut slow = Recorder::new(CommandName::LocalGet);
        slow.delay = Duration::from_millis(30);
        slow.gauge = gauge.clone();
        let mut blocking = Recorder::new(CommandName::NetworkGet);
        blocking.gauge = gauge.clone();
        let slow = Arc::new(slow);
        let blocking = Arc::new(blocking);
        let exec = executor(vec![slow.clone(), blocking.clone()], 4);

        for _ in 0..3 {
            let cmd = Command::new(CommandName::LocalGet, payload(), now_millis()).with_priority(9);
            exec.scheduler().add_command(cmd).unwrap();
        }
        let cmd = Command::new(CommandName::NetworkGet, payload(), now_millis())
            .with_priority(1)
            .blocking(true);
        exec.scheduler().add_command(cmd).unwrap();
        exec.drain().await.unwrap();

        assert_eq!(slow.calls(), 3);
        assert_eq!(blocking.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_resets_interrupted_and_stops_on_shutdown() {
        let handler = Arc::new(Recorder::new(CommandName::LocalGet));
        let exec = executor(vec![handler.clone()], 4);

        let mut stale = Command::new(CommandName::LocalGet, payload(), now_millis());
        stale.status = CommandStatus::Running;
        exec.scheduler().repository().insert_command(&stale).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(exec.clone().run(rx));

        let mut done = false;
        for _ in 0..100 {
            if status(&exec, &stale.id) == CommandStatus::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_command_resumes_after_restart() {
        use trellis_storage::sqlite::SqliteRepository;
        use trellis_storage::traits::CommandRepository;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("commands.db");
        let path = path.to_str().unwrap();

        // First process claims the command, then dies mid-run.
        let id = {
            let repo = SqliteRepository::new(path).unwrap();
            let command = Command::new(CommandName::LocalGet, payload(), 0);
            repo.insert_command(&command).unwrap();
            assert!(repo.claim_command(&command.id, 1).unwrap());
            command.id
        };

        let handler = Arc::new(Recorder::new(CommandName::LocalGet));
        let scheduler = Scheduler::new(Arc::new(SqliteRepository::new(path).unwrap()));
        let mut registry = HandlerRegistry::new();
        registry.register(handler.clone());
        let exec = Arc::new(CommandExecutor::new(
            scheduler,
            registry,
            ExecutorConfig {
                max_workers: 2,
                poll_interval: Duration::from_millis(10),
            },
        ));
        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(exec.clone().run(rx));

        for _ in 0..200 {
            if status(&exec, &id) == CommandStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(status(&exec, &id), CommandStatus::Completed);
        assert_eq!(handler.calls(), 1);
    }
}
