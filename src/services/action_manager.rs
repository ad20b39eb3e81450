//! Action Execution Manager (§4.8): a global queue plus one queue per
//! partition key, drained by a round-robin worker pool with per-partition
//! serialization, fed by a deduplicating poller.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::ActionRun;
use crate::domain::ports::{ActionExecutor, PortalClient};

/// Hard ceiling on the cooperative rate-limit sleep, per §4.8's execution
/// step: "sleep the minimum of the reported wait time and a hard cap
/// (10s)". Kept fixed rather than derived from `poll_check_interval_seconds`
/// — the specification states the cap as a literal constant, not a
/// function of polling cadence.
const RATE_LIMIT_SLEEP_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ActionManagerConfig {
    pub workers_count: usize,
    pub poll_check_interval: Duration,
    pub visibility_timeout_ms: u64,
    pub runs_buffer_high_watermark: usize,
    pub max_wait_before_shutdown: Duration,
}

impl Default for ActionManagerConfig {
    fn default() -> Self {
        Self {
            workers_count: 4,
            poll_check_interval: Duration::from_secs(5),
            visibility_timeout_ms: 30_000,
            runs_buffer_high_watermark: 1000,
            max_wait_before_shutdown: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct Queues {
    global: VecDeque<ActionRun>,
    partitioned: BTreeMap<String, VecDeque<ActionRun>>,
    /// Partitions currently held by a worker; prevents two workers from
    /// draining the same partition concurrently.
    locked_partitions: BTreeSet<String>,
    /// Run IDs already queued or in flight, so the poller never double-enqueues.
    tracked: BTreeSet<Uuid>,
    cursor: usize,
}

impl Queues {
    fn total_pending(&self) -> usize {
        self.global.len() + self.partitioned.values().map(VecDeque::len).sum::<usize>()
    }

    fn enqueue(&mut self, run: ActionRun) {
        if !self.tracked.insert(run.id) {
            return;
        }
        match run.queue_key() {
            Some(key) => self.partitioned.entry(key.to_string()).or_default().push_back(run),
            None => self.global.push_back(run),
        }
    }

    /// Round-robins over the global queue and every partition queue,
    /// skipping partitions already locked by another worker, and returns the
    /// next claimable run along with the queue key it came from.
    fn claim_next(&mut self) -> Option<(Option<String>, ActionRun)> {
        let mut keys: Vec<Option<String>> = vec![None];
        keys.extend(self.partitioned.keys().cloned().map(Some));
        if keys.is_empty() {
            return None;
        }

        let len = keys.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            let key = &keys[idx];
            let available = match key {
                None => !self.global.is_empty(),
                Some(partition) => !self.locked_partitions.contains(partition) && self.partitioned.get(partition).is_some_and(|q| !q.is_empty()),
            };
            if !available {
                continue;
            }
            self.cursor = (idx + 1) % len;
            let run = match key {
                None => self.global.pop_front()?,
                Some(partition) => {
                    self.locked_partitions.insert(partition.clone());
                    self.partitioned.get_mut(partition)?.pop_front()?
                }
            };
            return Some((key.clone(), run));
        }
        None
    }

    fn release(&mut self, key: Option<String>, run_id: Uuid) {
        self.tracked.remove(&run_id);
        if let Some(partition) = key {
            self.locked_partitions.remove(&partition);
            if self.partitioned.get(&partition).is_some_and(VecDeque::is_empty) {
                self.partitioned.remove(&partition);
            }
        }
    }
}

pub struct ActionManager {
    portal: Arc<dyn PortalClient>,
    executors: BTreeMap<String, Arc<dyn ActionExecutor>>,
    config: ActionManagerConfig,
    queues: Arc<Mutex<Queues>>,
    work_available: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

impl ActionManager {
    pub fn new(portal: Arc<dyn PortalClient>, executors: Vec<Arc<dyn ActionExecutor>>, config: ActionManagerConfig) -> Self {
        let executors = executors.into_iter().map(|e| (e.action_name().to_string(), e)).collect();
        Self {
            portal,
            executors,
            config,
            queues: Arc::new(Mutex::new(Queues::default())),
            work_available: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the poller and the worker pool; returns their join handles.
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![tokio::spawn({
            let manager = Arc::clone(self);
            async move { manager.run_poller().await }
        })];
        for _ in 0..self.config.workers_count {
            handles.push(tokio::spawn({
                let manager = Arc::clone(self);
                async move { manager.run_worker().await }
            }));
        }
        handles
    }

    pub async fn shutdown(&self, handles: Vec<tokio::task::JoinHandle<()>>) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.work_available.notify_waiters();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.max_wait_before_shutdown, drain).await.is_err() {
            warn!("action workers did not finish within the shutdown grace window; abandoning remainder");
        }
    }

    async fn run_poller(&self) {
        let mut since = None;
        let mut ticker = tokio::time::interval(self.config.poll_check_interval);
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            ticker.tick().await;

            let pending = self.queues.lock().await.total_pending();
            if pending >= self.config.runs_buffer_high_watermark {
                continue;
            }
            let limit = self.config.runs_buffer_high_watermark - pending;

            match self.portal.poll_action_runs(since, limit).await {
                Ok(runs) => {
                    if let Some(last) = runs.iter().map(|r| r.created_at).max() {
                        since = Some(last);
                    }
                    let mut queues = self.queues.lock().await;
                    for run in runs {
                        queues.enqueue(run);
                    }
                    drop(queues);
                    self.work_available.notify_waiters();
                }
                Err(err) => warn!(error = %err, "failed to poll pending action runs"),
            }
        }
    }

    async fn run_worker(&self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let claimed = self.queues.lock().await.claim_next();
            let Some((key, run)) = claimed else {
                tokio::select! {
                    () = self.work_available.notified() => {},
                    () = tokio::time::sleep(Duration::from_millis(200)) => {},
                }
                continue;
            };

            let run_id = run.id;
            self.execute_one(run).await;
            self.queues.lock().await.release(key, run_id);
        }
    }

    async fn execute_one(&self, run: ActionRun) {
        let Some(executor) = self.executors.get(&run.action_name).cloned() else {
            warn!(action = %run.action_name, run_id = %run.id, "no executor registered for action");
            self.patch_failure(&run, "no executor registered").await;
            return;
        };

        if executor.is_close_to_rate_limit() {
            let wait = Duration::from_secs_f64(executor.get_remaining_seconds_until_rate_limit().max(0.0));
            tokio::time::sleep(wait.min(RATE_LIMIT_SLEEP_CAP)).await;
        }

        match executor.execute(&run).await {
            Ok(()) => info!(run_id = %run.id, action = %run.action_name, "action executed"),
            Err(err) => {
                warn!(error = %err, run_id = %run.id, action = %run.action_name, "action execution failed");
                self.patch_failure(&run, &err.to_string()).await;
            }
        }
    }

    async fn patch_failure(&self, run: &ActionRun, summary: &str) {
        let patch = serde_json::json!({"status": "failure", "summary": summary});
        if let Err(err) = self.portal.patch_run(&run.id, &patch).await {
            warn!(error = %err, run_id = %run.id, "failed to patch run status after execution failure");
        }
    }
}
