//! Discovery task scheduler.
//!
//! ## Overview
//!
//! Multiplexes recurring subscriptions and one-off "hot" lookups over a
//! small pool of workers. Tasks sit in a min-heap ordered by their next run
//! time. A single dispatch loop sleeps until the earliest task is due, then
//! hands out every task due within a short look-ahead window so wake-ups
//! clump together instead of trickling in one by one.
//!
//! ## Workers
//!
//! - `min_workers` persistent workers read from a bounded channel
//! - Hot tasks that find every persistent worker busy may start a burst
//!   worker, as long as fewer than `max_workers` are running in total
//! - A task that cannot be placed goes back on the queue and dispatch stops
//!   until something finishes
//!
//! ## Task Lifecycle
//!
//! ```text
//! schedule_task ──► Idle (queued) ──► InProgress ──► Completed
//!                        ▲                               │
//!                        └──── hot: +20s / sub: +interval┤
//!                                                        └──► deleted
//! ```
//!
//! Errors from the discoverer are stored on the task and never stop the
//! scheduler. The next scheduled run is the retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use hypersync_core::{DiscoveryKey, HeapContext, IndexedHeap, Iri, Version};

use crate::config::SyncConfig;
use crate::ctx::SyncCtx;
use crate::error::{Error, Result};
use crate::progress::Progress;

/// How far past "now" a task may be due and still run in this wake-up.
pub const LOOK_AHEAD: Duration = Duration::from_secs(10);

/// How long a task stays hot after its last request.
pub const HOT_TTL: Duration = Duration::from_secs(40);

/// How often a hot task re-runs.
pub const HOT_INTERVAL: Duration = Duration::from_secs(20);

// ─────────────────────────────────────────────────────────────────────────────
// Task state
// ─────────────────────────────────────────────────────────────────────────────

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the queue.
    #[default]
    Idle,
    /// Handed to a worker.
    InProgress,
    /// Ran at least once and is not running now.
    Completed,
}

/// Snapshot of a task, for callers polling for results.
#[derive(Debug, Clone, Default)]
pub struct TaskInfo {
    /// Lifecycle state.
    pub state: TaskState,
    /// Progress of the current or last run.
    pub progress: Option<Arc<Progress>>,
    /// Version found by the last run.
    pub result: Option<Version>,
    /// When the last run finished.
    pub last_result_time: Option<Instant>,
    /// Error of the last run.
    pub last_err: Option<Arc<Error>>,
}

/// Flags for [`DiscoveryScheduler::schedule_task`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOpts {
    /// Make the task a persistent subscription.
    pub force_subscription: bool,
    /// Extend the hot deadline (a heartbeat from an interested caller).
    pub is_hot: bool,
}

#[derive(Debug)]
struct TaskHandle {
    queue_index: Option<usize>,
    next_run_time: Instant,
    subscription: bool,
    hot_deadline: Option<Instant>,
    run_count: u64,

    state: TaskState,
    progress: Option<Arc<Progress>>,
    result: Option<Version>,
    last_err: Option<Arc<Error>>,
    last_run_time: Option<Instant>,
}

impl TaskHandle {
    fn new(now: Instant) -> Self {
        Self {
            queue_index: None,
            next_run_time: now,
            subscription: false,
            hot_deadline: None,
            run_count: 0,
            state: TaskState::Idle,
            progress: None,
            result: None,
            last_err: None,
            last_run_time: None,
        }
    }

    fn is_hot(&self, now: Instant) -> bool {
        self.hot_deadline.is_some_and(|deadline| now < deadline)
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            state: self.state,
            progress: self.progress.clone(),
            result: self.result.clone(),
            last_result_time: self.last_run_time,
            last_err: self.last_err.clone(),
        }
    }
}

/// Heap callbacks over the task table.
struct QueueCtx<'a> {
    tasks: &'a mut HashMap<DiscoveryKey, TaskHandle>,
}

impl HeapContext<DiscoveryKey> for QueueCtx<'_> {
    fn less(&self, a: &DiscoveryKey, b: &DiscoveryKey) -> bool {
        match (self.tasks.get(a), self.tasks.get(b)) {
            (Some(a), Some(b)) => a.next_run_time < b.next_run_time,
            _ => false,
        }
    }

    fn index_changed(&mut self, key: &DiscoveryKey, index: Option<usize>) {
        if let Some(task) = self.tasks.get_mut(key) {
            task.queue_index = index;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discoverer
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one discovery. Implemented by the sync service.
#[async_trait]
pub trait Discoverer: Send + Sync + 'static {
    /// Find `iri` (at `version`, or latest) on the network and store it
    /// locally. Must respect `ctx` and keep `progress` current.
    async fn discover_object_with_progress(
        &self,
        iri: &Iri,
        version: &Version,
        recursive: bool,
        progress: &Progress,
        ctx: &SyncCtx,
    ) -> Result<Option<Version>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Persistent workers.
    pub min_workers: usize,
    /// Total workers including bursts.
    pub max_workers: usize,
    /// Subscription refresh interval.
    pub interval: Duration,
    /// Upper bound of the startup jitter.
    pub warmup_duration: Duration,
    /// Time budget of one discovery run.
    pub task_timeout: Duration,
}

impl From<&SyncConfig> for SchedulerConfig {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            min_workers: cfg.min_workers,
            max_workers: cfg.max_workers,
            interval: cfg.interval,
            warmup_duration: cfg.warmup_duration,
            task_timeout: cfg.timeout_per_peer,
        }
    }
}

#[derive(Debug, Default)]
struct SchedState {
    tasks: HashMap<DiscoveryKey, TaskHandle>,
    queue: IndexedHeap<DiscoveryKey>,
    /// Next wake-up of the dispatch loop. `None` sleeps until woken.
    timer: Option<Instant>,
}

struct Job {
    key: DiscoveryKey,
    progress: Arc<Progress>,
}

struct Shared<D> {
    disc: Arc<D>,
    cfg: SchedulerConfig,
    state: Mutex<SchedState>,
    wake: Notify,
    worker_tx: mpsc::Sender<Job>,
    worker_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

/// Bounded-worker scheduler for discovery tasks.
///
/// Cheap to clone; clones share the same task table.
pub struct DiscoveryScheduler<D> {
    shared: Arc<Shared<D>>,
}

impl<D> Clone for DiscoveryScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Discoverer> DiscoveryScheduler<D> {
    /// Create a scheduler. Nothing runs until [`run`](Self::run).
    ///
    /// # Panics
    ///
    /// Panics if either worker count is zero or `max_workers < min_workers`.
    pub fn new(disc: Arc<D>, cfg: SchedulerConfig) -> Self {
        if cfg.min_workers == 0 || cfg.max_workers == 0 || cfg.max_workers < cfg.min_workers {
            panic!("BUG: invalid worker count");
        }

        let (worker_tx, worker_rx) = mpsc::channel(cfg.min_workers);
        Self {
            shared: Arc::new(Shared {
                disc,
                cfg,
                state: Mutex::new(SchedState::default()),
                wake: Notify::new(),
                worker_tx,
                worker_rx: Mutex::new(Some(worker_rx)),
                permits: Arc::new(Semaphore::new(cfg.max_workers)),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Create or update a task and return its current state.
    ///
    /// A new task, or an existing one promoted to subscription, runs right
    /// away unless it is already running. `is_hot` only extends the hot
    /// deadline of a known task.
    pub fn schedule_task(&self, key: DiscoveryKey, now: Instant, opts: ScheduleOpts) -> TaskInfo {
        let mut state = self.shared.lock();
        let info = state.schedule_task(key, now, opts, self.shared.cfg.interval);
        self.shared.reset_timer(&mut state);
        info
    }

    /// Add many subscriptions without waking the dispatch loop for each.
    pub fn load_subscriptions(&self, keys: impl IntoIterator<Item = DiscoveryKey>) {
        let mut state = self.shared.lock();
        let now = Instant::now();
        let opts = ScheduleOpts {
            force_subscription: true,
            is_hot: false,
        };
        for key in keys {
            state.schedule_task(key, now, opts, self.shared.cfg.interval);
        }
    }

    /// Drop the subscription flag of `keys`.
    ///
    /// Tasks that are neither hot nor running are deleted now. The rest
    /// finish or expire on their own.
    pub fn remove_subscriptions<'a>(&self, keys: impl IntoIterator<Item = &'a DiscoveryKey>) {
        let mut state = self.shared.lock();
        let now = Instant::now();
        for key in keys {
            let Some(task) = state.tasks.get_mut(key) else {
                continue;
            };
            task.subscription = false;
            if task.is_hot(now) || task.state == TaskState::InProgress {
                continue;
            }
            let queued = task.queue_index;
            state.delete(key, queued);
        }
    }

    /// Current state of a task, if it is known.
    pub fn task_info(&self, key: &DiscoveryKey) -> Option<TaskInfo> {
        self.shared.lock().tasks.get(key).map(TaskHandle::info)
    }

    /// Number of known tasks.
    pub fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Whether no task is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the dispatch loop and the workers until `cancel` fires.
    ///
    /// Waits for running tasks to stop before returning. Always returns an
    /// error: [`Error::Cancelled`] after a normal shutdown, or
    /// [`Error::SchedulerRunning`] if called twice.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let rx = self
            .shared
            .worker_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::SchedulerRunning)?;
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for _ in 0..self.shared.cfg.min_workers {
            let permit = Arc::clone(&self.shared.permits).try_acquire_owned().ok();
            let shared = Arc::clone(&self.shared);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            self.shared.tracker.spawn(async move {
                let _permit = permit;
                shared.worker_loop(rx, cancel).await;
            });
        }

        {
            let mut state = self.shared.lock();
            state.timer = Some(Instant::now() + warmup_jitter(self.shared.cfg.warmup_duration));
        }

        tracing::debug!(
            min_workers = self.shared.cfg.min_workers,
            max_workers = self.shared.cfg.max_workers,
            "discovery scheduler started"
        );

        loop {
            let timer = self.shared.lock().timer;
            let sleep = async move {
                match timer {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.shared.wake.notified() => continue,
                _ = sleep => {
                    let mut state = self.shared.lock();
                    let next = self.shared.dispatch_ready(&mut state, &cancel);
                    state.timer = next;
                }
            }
        }

        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        tracing::debug!("discovery scheduler stopped");
        Err(Error::Cancelled)
    }
}

impl<D: Discoverer> Shared<D> {
    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point the timer at the earliest queued task and wake the loop.
    fn reset_timer(&self, state: &mut SchedState) {
        state.timer = state
            .queue
            .peek()
            .and_then(|key| state.tasks.get(key))
            .map(|task| task.next_run_time);
        self.wake.notify_one();
    }

    /// Hand out due tasks. Returns the next wake-up.
    fn dispatch_ready(
        self: &Arc<Self>,
        state: &mut SchedState,
        cancel: &CancellationToken,
    ) -> Option<Instant> {
        let SchedState { tasks, queue, .. } = state;

        while let Some(key) = queue.peek().cloned() {
            let now = Instant::now();
            let Some(task) = tasks.get(&key) else {
                queue.pop(&mut QueueCtx { tasks: &mut *tasks });
                continue;
            };

            if task.state == TaskState::InProgress {
                queue.pop(&mut QueueCtx { tasks: &mut *tasks });
                continue;
            }

            // Tasks due soon run now too, so wake-ups clump.
            if task.next_run_time > now + LOOK_AHEAD {
                return Some(task.next_run_time);
            }
            let hot = task.is_hot(now);

            queue.pop(&mut QueueCtx { tasks: &mut *tasks });

            let progress = Arc::new(Progress::default());
            if let Some(task) = tasks.get_mut(&key) {
                task.state = TaskState::InProgress;
                task.progress = Some(Arc::clone(&progress));
            }

            let job = Job {
                key: key.clone(),
                progress,
            };
            let job = match self.worker_tx.try_send(job) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(job))
                | Err(mpsc::error::TrySendError::Closed(job)) => job,
            };

            if hot {
                if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
                    let shared = Arc::clone(self);
                    let cancel = cancel.clone();
                    self.tracker.spawn(async move {
                        let _permit = permit;
                        shared.execute(job, &cancel).await;
                    });
                    continue;
                }
            }

            // Every worker is busy. Put it back and wait for one to finish.
            if let Some(task) = tasks.get_mut(&key) {
                task.state = TaskState::Idle;
                task.progress = None;
                if task.queue_index.is_none() {
                    queue.push(key, &mut QueueCtx { tasks: &mut *tasks });
                }
            }
            break;
        }

        None
    }

    async fn worker_loop(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else {
                return;
            };
            self.execute(job, &cancel).await;
        }
    }

    async fn execute(&self, job: Job, cancel: &CancellationToken) {
        let ctx = SyncCtx::new(cancel.child_token()).with_timeout(self.cfg.task_timeout);
        let Job { key, progress } = job;

        let res = ctx
            .run(self.disc.discover_object_with_progress(
                &key.iri,
                &key.version,
                key.recursive,
                &progress,
                &ctx,
            ))
            .await;

        let mut state = self.lock();
        let now = Instant::now();
        let Some(task) = state.tasks.get_mut(&key) else {
            return;
        };

        task.state = TaskState::Completed;
        task.last_run_time = Some(now);
        task.run_count += 1;
        match res {
            Ok(result) => {
                task.result = result;
                task.last_err = None;
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "discovery task failed");
                task.result = None;
                task.last_err = Some(Arc::new(e));
            }
        }

        state.schedule_next(&key, now, false, self.cfg.interval);
        self.reset_timer(&mut state);
    }
}

impl SchedState {
    fn schedule_task(
        &mut self,
        key: DiscoveryKey,
        now: Instant,
        opts: ScheduleOpts,
        interval: Duration,
    ) -> TaskInfo {
        let mut force_immediate = false;
        let exists = self.tasks.contains_key(&key);
        if !exists {
            self.tasks.insert(key.clone(), TaskHandle::new(now));
            force_immediate = true;
        }

        let Some(task) = self.tasks.get_mut(&key) else {
            return TaskInfo::default();
        };

        if opts.force_subscription && !task.subscription {
            task.subscription = true;
            if exists {
                force_immediate = true;
            }
        }

        if opts.is_hot {
            task.hot_deadline = Some(now + HOT_TTL);
        }

        let info = task.info();
        if (force_immediate || task.run_count == 0) && task.state != TaskState::InProgress {
            self.schedule_next(&key, now, force_immediate, interval);
        }
        info
    }

    /// Pick the next run time and (re)queue the task, or delete it when it
    /// is neither hot nor a subscription.
    fn schedule_next(
        &mut self,
        key: &DiscoveryKey,
        now: Instant,
        force_immediate: bool,
        interval: Duration,
    ) {
        let Some(task) = self.tasks.get_mut(key) else {
            return;
        };

        let next = if force_immediate || task.run_count == 0 {
            now
        } else if task.is_hot(now) {
            now + HOT_INTERVAL
        } else if task.subscription {
            now + interval
        } else {
            let queued = task.queue_index;
            self.delete(key, queued);
            return;
        };
        task.next_run_time = next;

        let queued = task.queue_index;
        let mut ctx = QueueCtx {
            tasks: &mut self.tasks,
        };
        match queued {
            Some(index) => self.queue.fix(index, &mut ctx),
            None => self.queue.push(key.clone(), &mut ctx),
        }
    }

    fn delete(&mut self, key: &DiscoveryKey, queued: Option<usize>) {
        if let Some(index) = queued {
            self.queue.remove(index, &mut QueueCtx {
                tasks: &mut self.tasks,
            });
        }
        self.tasks.remove(key);
    }
}

fn warmup_jitter(warmup: Duration) -> Duration {
    let max = u64::try_from(warmup.as_millis()).unwrap_or(u64::MAX);
    if max == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls and optionally blocks until released.
    struct MockDiscoverer {
        calls: Mutex<HashMap<Iri, usize>>,
        gate: Option<Semaphore>,
    }

    impl MockDiscoverer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(HashMap::new()),
                gate: None,
            })
        }

        fn blocking() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(HashMap::new()),
                gate: Some(Semaphore::new(0)),
            })
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.close();
            }
        }

        fn calls(&self, iri: &Iri) -> usize {
            self.calls.lock().unwrap().get(iri).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Discoverer for MockDiscoverer {
        async fn discover_object_with_progress(
            &self,
            iri: &Iri,
            _version: &Version,
            _recursive: bool,
            _progress: &Progress,
            ctx: &SyncCtx,
        ) -> Result<Option<Version>> {
            *self.calls.lock().unwrap().entry(iri.clone()).or_default() += 1;

            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = ctx.cancellation().cancelled() => return Err(Error::Cancelled),
                    _ = gate.acquire() => {}
                }
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Some(Version::new("v1")))
        }
    }

    fn test_config(interval: Duration, min_workers: usize, max_workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            min_workers,
            max_workers,
            interval,
            warmup_duration: Duration::from_millis(1),
            task_timeout: Duration::from_secs(30),
        }
    }

    fn key(s: &str) -> DiscoveryKey {
        DiscoveryKey::latest(Iri::parse(s).unwrap(), false)
    }

    fn start(
        disc: &Arc<MockDiscoverer>,
        cfg: SchedulerConfig,
    ) -> (DiscoveryScheduler<MockDiscoverer>, CancellationToken) {
        let sched = DiscoveryScheduler::new(Arc::clone(disc), cfg);
        let cancel = CancellationToken::new();
        let runner = sched.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let _ = runner.run(token).await;
        });
        (sched, cancel)
    }

    async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    const HOT: ScheduleOpts = ScheduleOpts {
        force_subscription: false,
        is_hot: true,
    };

    const SUB: ScheduleOpts = ScheduleOpts {
        force_subscription: true,
        is_hot: false,
    };

    #[tokio::test]
    async fn test_hot_task_runs() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        let k = key("hm://alice/foo");
        sched.schedule_task(k.clone(), Instant::now(), HOT);

        assert!(eventually(Duration::from_secs(1), || disc.calls(&k.iri) > 0).await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_subscription_refreshes() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        let k = key("hm://alice/sub");
        sched.schedule_task(k.clone(), Instant::now(), SUB);

        assert!(eventually(Duration::from_secs(1), || disc.calls(&k.iri) > 0).await);
        assert!(eventually(Duration::from_secs(1), || disc.calls(&k.iri) > 1).await);

        let state = sched.shared.lock();
        let task = &state.tasks[&k];
        assert!(task.subscription);
        assert!(task.hot_deadline.is_none());
        drop(state);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_extending_hot_deadline_while_running_does_not_rerun() {
        let disc = MockDiscoverer::blocking();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        let k = key("hm://alice/race");
        sched.schedule_task(k.clone(), Instant::now(), SUB);

        let running = eventually(Duration::from_secs(1), || {
            sched
                .task_info(&k)
                .is_some_and(|info| info.state == TaskState::InProgress)
        })
        .await;
        assert!(running);

        sched.schedule_task(k.clone(), Instant::now(), HOT);
        assert!(sched.shared.lock().tasks[&k].hot_deadline.is_some());

        disc.release();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(disc.calls(&k.iri), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_wakes_on_new_task() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sched.shared.lock().queue.len(), 0);

        let k = key("hm://alice/new-task");
        sched.schedule_task(k.clone(), Instant::now(), HOT);

        assert!(eventually(Duration::from_millis(500), || disc.calls(&k.iri) > 0).await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_hot_subscription_keeps_both_flags() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        let k = key("hm://alice/hybrid");
        sched.schedule_task(
            k.clone(),
            Instant::now(),
            ScheduleOpts {
                force_subscription: true,
                is_hot: true,
            },
        );

        assert!(eventually(Duration::from_secs(1), || disc.calls(&k.iri) > 0).await);

        let state = sched.shared.lock();
        let task = &state.tasks[&k];
        assert!(task.hot_deadline.is_some());
        assert!(task.subscription);
        drop(state);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_heap_index_tracking() {
        let disc = MockDiscoverer::new();
        let sched = DiscoveryScheduler::new(disc, test_config(Duration::from_millis(100), 1, 2));

        let now = Instant::now();
        let keys = [key("hm://task1"), key("hm://task2"), key("hm://task3")];

        let mut guard = sched.shared.lock();
        let state = &mut *guard;
        for (i, k) in keys.iter().enumerate() {
            let mut task = TaskHandle::new(now);
            task.next_run_time = now + Duration::from_millis(100 * (i as u64 + 1));
            state.tasks.insert(k.clone(), task);
        }
        for k in &keys {
            state.queue.push(
                k.clone(),
                &mut QueueCtx {
                    tasks: &mut state.tasks,
                },
            );
        }

        assert_eq!(state.tasks[&keys[0]].queue_index, Some(0));
        for k in &keys {
            let index = state.tasks[k].queue_index.unwrap();
            assert!(index < state.queue.len());
        }

        // Move task3 to the front.
        let t3 = state.tasks.get_mut(&keys[2]).unwrap();
        t3.next_run_time = now - Duration::from_millis(1);
        let index = t3.queue_index.unwrap();
        state.queue.fix(
            index,
            &mut QueueCtx {
                tasks: &mut state.tasks,
            },
        );

        assert_eq!(state.tasks[&keys[2]].queue_index, Some(0));
        assert_ne!(state.tasks[&keys[0]].queue_index, Some(0));

        let popped = state.queue.pop(&mut QueueCtx {
            tasks: &mut state.tasks,
        });
        assert_eq!(popped.as_ref(), Some(&keys[2]));
        assert_eq!(state.tasks[&keys[2]].queue_index, None);
        assert_eq!(state.queue.len(), 2);

        let index = state.tasks[&keys[0]].queue_index.unwrap();
        assert!(index < state.queue.len());
    }

    #[tokio::test]
    async fn test_task_not_lost_when_workers_busy() {
        let disc = MockDiscoverer::blocking();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 1));

        let keys = [key("hm://task1"), key("hm://task2"), key("hm://task3")];
        for k in &keys {
            sched.schedule_task(k.clone(), Instant::now(), SUB);
        }

        let started = eventually(Duration::from_secs(1), || {
            keys.iter().any(|k| {
                sched
                    .task_info(k)
                    .is_some_and(|info| info.state == TaskState::InProgress)
            })
        })
        .await;
        assert!(started);

        disc.release();

        let all_ran = eventually(Duration::from_secs(2), || {
            keys.iter().all(|k| disc.calls(&k.iri) > 0)
        })
        .await;
        assert!(all_ran);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_one_off_task_is_deleted_after_run() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 2));

        // Neither hot nor a subscription: runs once, then goes away.
        let k = key("hm://alice/once");
        sched.schedule_task(k.clone(), Instant::now(), ScheduleOpts::default());

        assert!(eventually(Duration::from_secs(1), || disc.calls(&k.iri) == 1).await);
        assert!(eventually(Duration::from_secs(1), || sched.task_info(&k).is_none()).await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_remove_subscription_deletes_idle_task() {
        let disc = MockDiscoverer::new();
        let sched = DiscoveryScheduler::new(disc, test_config(Duration::from_secs(60), 1, 2));

        let a = key("hm://alice/a");
        let b = key("hm://alice/b");
        sched.load_subscriptions([a.clone(), b.clone()]);
        assert_eq!(sched.len(), 2);
        assert_eq!(sched.shared.lock().queue.len(), 2);

        sched.remove_subscriptions([&a]);
        assert!(sched.task_info(&a).is_none());
        assert_eq!(sched.shared.lock().queue.len(), 1);

        // Hot tasks survive until their deadline passes.
        sched.schedule_task(b.clone(), Instant::now(), HOT);
        sched.remove_subscriptions([&b]);
        assert!(sched.task_info(&b).is_some());
        assert!(!sched.shared.lock().tasks[&b].subscription);
    }

    #[tokio::test]
    async fn test_errors_are_recorded() {
        struct Failing;

        #[async_trait]
        impl Discoverer for Failing {
            async fn discover_object_with_progress(
                &self,
                _iri: &Iri,
                _version: &Version,
                _recursive: bool,
                _progress: &Progress,
                _ctx: &SyncCtx,
            ) -> Result<Option<Version>> {
                Err(Error::NoProviders)
            }
        }

        let sched = DiscoveryScheduler::new(
            Arc::new(Failing),
            test_config(Duration::from_secs(60), 1, 1),
        );
        let cancel = CancellationToken::new();
        let runner = sched.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(token).await });

        let k = key("hm://alice/broken");
        sched.schedule_task(k.clone(), Instant::now(), SUB);

        let failed = eventually(Duration::from_secs(1), || {
            sched
                .task_info(&k)
                .is_some_and(|info| info.last_err.is_some())
        })
        .await;
        assert!(failed);

        let info = sched.task_info(&k).unwrap();
        assert_eq!(info.state, TaskState::Completed);
        assert!(matches!(info.last_err.as_deref(), Some(Error::NoProviders)));
        assert!(info.last_result_time.is_some());

        cancel.cancel();
        assert!(matches!(handle.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let disc = MockDiscoverer::new();
        let (sched, cancel) = start(&disc, test_config(Duration::from_millis(100), 1, 1));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let res = sched.run(cancel.clone()).await;
        assert!(matches!(res, Err(Error::SchedulerRunning)));
        cancel.cancel();
    }

    #[test]
    #[should_panic(expected = "BUG: invalid worker count")]
    fn test_invalid_worker_count_panics() {
        let _ = DiscoveryScheduler::new(
            MockDiscoverer::new(),
            test_config(Duration::from_secs(1), 4, 2),
        );
    }
}
