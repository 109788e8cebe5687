//! # Navigation Manager
//!
//! The [`TaskOrchestrator`] runs navigation tasks (goals and backups) on the navigation subsystem,
//! one at a time. A request which arrives while a task is running is refused with
//! [`NavMgrError::TaskBusy`], it is never queued and never touches the running task.
//!
//! Once started a task is polled every `poll_period_ms` until the navigation subsystem reports it
//! complete. Every `feedback_every` polls a feedback sample is taken and passed to the
//! [`FeedbackSink`]. Sampling is best effort, failures are logged and the task carries on.
//!
//! A cancel which arrives before the task has started on the navigation subsystem is held on the
//! task. The task then either ends as canceled without being started, or is canceled as soon as
//! its start has been accepted.
//!
//! Each task is driven on its own tokio task, so a client going away mid request doesn't leave
//! the navigation subsystem running a task nobody is tracking. The request itself waits for the
//! terminal outcome.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod obs;
mod outcome;
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use comms_if::{
    api::{BackupQuery, GoalInput, TaskInfo},
    eqpt::nav::PoseStamped,
};
use log::{debug, error, info, trace, warn};
use tokio::time::MissedTickBehavior;

use crate::{
    loc::{Pose, PoseCache},
    nav_client::{NavClientError, NavSubsystem},
};

pub use self::{
    obs::{FeedbackSink, LogFeedbackSink},
    outcome::{TaskKind, TaskOutcome, TaskState},
    params::NavMgrParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Serialises navigation tasks against a single in-flight slot.
pub struct TaskOrchestrator {
    nav: Arc<dyn NavSubsystem>,

    pose_cache: Arc<PoseCache>,

    sink: Arc<dyn FeedbackSink>,

    params: NavMgrParams,

    /// The running task, if any. Only held for check-and-set and snapshots.
    active: Arc<Mutex<Option<ActiveTask>>>,

    next_id: AtomicU64,
}

#[derive(Debug, Clone)]
struct ActiveTask {
    id: u64,
    kind: TaskKind,
    state: TaskState,
    started: Instant,
    cancel_requested: bool,
}

/// Releases the active slot when the task that claimed it ends, however it ends.
struct TaskGuard {
    id: u64,
    kind: TaskKind,
    slot: Arc<Mutex<Option<ActiveTask>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How far a task got in starting on the navigation subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    Started,

    /// A cancel arrived before the start was sent, nothing was started
    CanceledBeforeStart,
}

#[derive(Debug, thiserror::Error)]
pub enum NavMgrError {
    #[error("A navigation task is already running")]
    TaskBusy,

    #[error("No pose has been received from the localisation service")]
    PoseUnavailable,

    #[error("The navigation subsystem is unavailable: {0}")]
    UpstreamUnavailable(NavClientError),

    #[error("The task driver ended abnormally: {0}")]
    TaskAborted(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TaskOrchestrator {
    pub fn new(
        nav: Arc<dyn NavSubsystem>,
        pose_cache: Arc<PoseCache>,
        sink: Arc<dyn FeedbackSink>,
        params: NavMgrParams,
    ) -> Self {
        Self {
            nav,
            pose_cache,
            sink,
            params,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Drive the robot to `goal`, starting from the current cached pose.
    ///
    /// Returns once the task has reached a terminal state.
    pub async fn request_goal(
        self: &Arc<Self>,
        goal: GoalInput,
    ) -> Result<TaskOutcome, NavMgrError> {
        let start = if self.params.require_pose {
            self.pose_cache
                .latest()
                .ok_or(NavMgrError::PoseUnavailable)?
        } else {
            self.pose_cache.read()
        };

        let guard = self.claim(TaskKind::Goal)?;
        info!(
            "Task {}: goal ({:.3}, {:.3}) from ({:.3}, {:.3})",
            guard.id,
            goal.x,
            goal.y,
            start.x(),
            start.y()
        );

        let this = self.clone();
        tokio::spawn(async move { this.run_goal(guard, start, goal).await })
            .await
            .map_err(|e| NavMgrError::TaskAborted(e.to_string()))?
    }

    /// Back the robot up in a straight line.
    ///
    /// Returns once the task has reached a terminal state.
    pub async fn request_backup(
        self: &Arc<Self>,
        backup: BackupQuery,
    ) -> Result<TaskOutcome, NavMgrError> {
        let guard = self.claim(TaskKind::Backup)?;
        info!(
            "Task {}: backup {:.3} m at {:.3} m/s within {} s",
            guard.id, backup.backup_dist, backup.backup_speed, backup.time_allowance
        );

        let this = self.clone();
        tokio::spawn(async move { this.run_backup(guard, backup).await })
            .await
            .map_err(|e| NavMgrError::TaskAborted(e.to_string()))?
    }

    /// Cancel the running task.
    ///
    /// Returns `false` without contacting the subsystem if no task is running. A task which hasn't
    /// started on the subsystem yet is canceled by its own driver, otherwise the subsystem is asked
    /// to cancel it. The task's own request reports the cancellation.
    pub async fn cancel(&self) -> Result<bool, NavMgrError> {
        let (id, running) = match *self.lock_active() {
            Some(ref mut t) => {
                t.cancel_requested = true;
                (t.id, t.state == TaskState::Running)
            }
            None => {
                debug!("Cancel requested with no running task");
                return Ok(false);
            }
        };

        if !running {
            info!("Task {}: cancel requested before the task started", id);
            return Ok(true);
        }

        info!("Task {}: cancel requested", id);
        self.nav
            .cancel_task()
            .await
            .map_err(NavMgrError::UpstreamUnavailable)?;

        Ok(true)
    }

    /// Snapshot of the running task, `None` when idle.
    pub fn current_task(&self) -> Option<TaskInfo> {
        self.lock_active().as_ref().map(|t| TaskInfo {
            id: t.id,
            kind: t.kind.to_string(),
            state: t.state.to_string(),
            elapsed_s: t.started.elapsed().as_secs_f64(),
        })
    }

    /// Atomically check that the slot is free and take it.
    fn claim(&self, kind: TaskKind) -> Result<TaskGuard, NavMgrError> {
        let mut active = self.lock_active();

        if let Some(ref t) = *active {
            debug!("Refusing {} task, task {} ({}) is running", kind, t.id, t.kind);
            return Err(NavMgrError::TaskBusy);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveTask {
            id,
            kind,
            state: TaskState::Pending,
            started: Instant::now(),
            cancel_requested: false,
        });

        Ok(TaskGuard {
            id,
            kind,
            slot: self.active.clone(),
        })
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTask>> {
        // The slot only holds plain data, a panic while it was held can't leave it inconsistent
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_goal(
        self: Arc<Self>,
        guard: TaskGuard,
        start: Pose,
        goal: GoalInput,
    ) -> Result<TaskOutcome, NavMgrError> {
        let started = async {
            self.wait_until_active().await?;

            let goal_pose = PoseStamped::map_xy(goal.x, goal.y, Utc::now());
            let path = self.nav.compute_path(start.to_stamped(), goal_pose).await?;
            trace!("Task {}: planned path of {:.3} m", guard.id, path.length_m());

            let path = self.nav.smooth_path(path).await?;

            if self.cancel_requested(&guard) {
                return Ok(Start::CanceledBeforeStart);
            }
            self.nav.follow_path(path).await?;

            Ok::<_, NavClientError>(Start::Started)
        }
        .await;

        self.drive(&guard, started).await
    }

    async fn run_backup(
        self: Arc<Self>,
        guard: TaskGuard,
        backup: BackupQuery,
    ) -> Result<TaskOutcome, NavMgrError> {
        let started = async {
            self.wait_until_active().await?;

            if self.cancel_requested(&guard) {
                return Ok(Start::CanceledBeforeStart);
            }
            self.nav
                .backup(
                    backup.backup_dist,
                    backup.backup_speed,
                    backup.time_allowance,
                )
                .await?;

            Ok::<_, NavClientError>(Start::Started)
        }
        .await;

        self.drive(&guard, started).await
    }

    async fn wait_until_active(&self) -> Result<(), NavClientError> {
        self.nav
            .wait_until_active(
                Duration::from_millis(self.params.poll_period_ms),
                Duration::from_millis(self.params.active_timeout_ms),
            )
            .await
    }

    /// Take a task whose start has been attempted through to its terminal state.
    async fn drive(
        &self,
        guard: &TaskGuard,
        started: Result<Start, NavClientError>,
    ) -> Result<TaskOutcome, NavMgrError> {
        match started {
            Ok(Start::Started) => (),
            Ok(Start::CanceledBeforeStart) => {
                info!("Task {}: canceled before it started", guard.id);
                self.sink
                    .finished(guard.id, guard.kind, TaskOutcome::Canceled, None);
                return Ok(TaskOutcome::Canceled);
            }
            Err(e) if e.is_rejection() => {
                warn!("Task {}: {}", guard.id, e);
                self.sink
                    .finished(guard.id, guard.kind, TaskOutcome::Failed, None);
                return Ok(TaskOutcome::Failed);
            }
            Err(e) => {
                error!("Task {}: could not start: {}", guard.id, e);
                return Err(NavMgrError::UpstreamUnavailable(e));
            }
        }

        // A cancel which arrived while the start was in flight didn't reach the subsystem
        if self.mark_running(guard) {
            info!("Task {}: canceling, the cancel arrived as it started", guard.id);
            if let Err(e) = self.nav.cancel_task().await {
                warn!("Task {}: could not cancel: {}", guard.id, e);
            }
        }

        let outcome = self.poll_to_completion(guard).await?;
        self.set_state(guard, TaskState::Finished(outcome));

        Ok(outcome)
    }

    async fn poll_to_completion(&self, guard: &TaskGuard) -> Result<TaskOutcome, NavMgrError> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.params.poll_period_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut i: u64 = 0;
        loop {
            interval.tick().await;

            let complete = self
                .nav
                .is_task_complete()
                .await
                .map_err(NavMgrError::UpstreamUnavailable)?;
            if complete {
                break;
            }

            i += 1;
            if self.params.feedback_every > 0 && i % self.params.feedback_every == 0 {
                match self.nav.get_feedback().await {
                    Ok(Some(fb)) => self.sink.feedback(guard.id, guard.kind, &fb),
                    Ok(None) => trace!("Task {}: no feedback yet", guard.id),
                    Err(e) => warn!("Task {}: could not sample feedback: {}", guard.id, e),
                }
            }
        }

        let code = self
            .nav
            .get_result()
            .await
            .map_err(NavMgrError::UpstreamUnavailable)?;
        let outcome = TaskOutcome::from(code);

        let task_error = match outcome {
            TaskOutcome::Failed => match self.nav.get_task_error().await {
                Ok(e) => e,
                Err(e) => {
                    warn!("Task {}: could not get the error details: {}", guard.id, e);
                    None
                }
            },
            TaskOutcome::Unknown => {
                warn!("Task {}: unrecognised result {}", guard.id, code);
                None
            }
            _ => None,
        };

        self.sink
            .finished(guard.id, guard.kind, outcome, task_error.as_ref());

        Ok(outcome)
    }

    fn cancel_requested(&self, guard: &TaskGuard) -> bool {
        matches!(*self.lock_active(), Some(ref t) if t.id == guard.id && t.cancel_requested)
    }

    /// Mark the task running, returns whether a cancel was requested before it was.
    fn mark_running(&self, guard: &TaskGuard) -> bool {
        match *self.lock_active() {
            Some(ref mut t) if t.id == guard.id => {
                t.state = TaskState::Running;
                t.cancel_requested
            }
            _ => false,
        }
    }

    fn set_state(&self, guard: &TaskGuard, state: TaskState) {
        if let Some(ref mut t) = *self.lock_active() {
            if t.id == guard.id {
                t.state = state;
            }
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());

        if matches!(*slot, Some(ref t) if t.id == self.id) {
            *slot = None;
            debug!("Task {} released", self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use comms_if::eqpt::nav::{NavFeedback, NavPath, NavResultCode, NavTaskError};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Scriptable navigation subsystem
    struct FakeNav {
        result: NavResultCode,
        task_error: Option<NavTaskError>,
        /// Number of completion checks before the task is reported complete
        polls_to_complete: usize,
        reject_plan: bool,
        unreachable: bool,
        feedback_fails: bool,
        /// Time taken to accept a backup
        start_delay: Duration,

        polls: AtomicUsize,
        starts: AtomicUsize,
        feedback_calls: AtomicUsize,
        cancels: AtomicUsize,
        canceled: AtomicBool,
        last_start: Mutex<Option<PoseStamped>>,
    }

    impl FakeNav {
        fn new(result: NavResultCode, polls_to_complete: usize) -> Self {
            Self {
                result,
                task_error: None,
                polls_to_complete,
                reject_plan: false,
                unreachable: false,
                feedback_fails: false,
                start_delay: Duration::from_millis(0),
                polls: AtomicUsize::new(0),
                starts: AtomicUsize::new(0),
                feedback_calls: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                canceled: AtomicBool::new(false),
                last_start: Mutex::new(None),
            }
        }

        fn check_reachable(&self) -> Result<(), NavClientError> {
            if self.unreachable {
                Err(NavClientError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NavSubsystem for FakeNav {
        async fn is_active(&self) -> Result<bool, NavClientError> {
            self.check_reachable()?;
            Ok(true)
        }

        async fn compute_path(
            &self,
            start: PoseStamped,
            goal: PoseStamped,
        ) -> Result<NavPath, NavClientError> {
            if self.reject_plan {
                return Err(NavClientError::Rejected("No valid path".into()));
            }
            *self.last_start.lock().unwrap() = Some(start.clone());
            Ok(NavPath {
                frame_id: "map".into(),
                poses: vec![start, goal],
            })
        }

        async fn smooth_path(&self, path: NavPath) -> Result<NavPath, NavClientError> {
            Ok(path)
        }

        async fn follow_path(&self, _: NavPath) -> Result<(), NavClientError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn backup(&self, _: f64, _: f64, _: u32) -> Result<(), NavClientError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.start_delay).await;
            Ok(())
        }

        async fn is_task_complete(&self) -> Result<bool, NavClientError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.canceled.load(Ordering::SeqCst) || n >= self.polls_to_complete)
        }

        async fn get_feedback(&self) -> Result<Option<NavFeedback>, NavClientError> {
            self.feedback_calls.fetch_add(1, Ordering::SeqCst);
            if self.feedback_fails {
                return Err(NavClientError::NotConnected);
            }
            Ok(Some(NavFeedback {
                distance_traveled: Some(0.1),
                distance_to_goal: Some(1.0),
                speed: Some(0.2),
            }))
        }

        async fn get_result(&self) -> Result<NavResultCode, NavClientError> {
            if self.canceled.load(Ordering::SeqCst) {
                return Ok(NavResultCode::CANCELED);
            }
            Ok(self.result)
        }

        async fn get_task_error(&self) -> Result<Option<NavTaskError>, NavClientError> {
            Ok(self.task_error.clone())
        }

        async fn cancel_task(&self) -> Result<(), NavClientError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.canceled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        feedback: Mutex<Vec<u64>>,
        finished: Mutex<Vec<(TaskOutcome, Option<i32>)>>,
    }

    impl FeedbackSink for RecordingSink {
        fn feedback(&self, task_id: u64, _: TaskKind, _: &NavFeedback) {
            self.feedback.lock().unwrap().push(task_id);
        }

        fn finished(&self, _: u64, _: TaskKind, outcome: TaskOutcome, e: Option<&NavTaskError>) {
            self.finished.lock().unwrap().push((outcome, e.map(|e| e.code)));
        }
    }

    fn params() -> NavMgrParams {
        NavMgrParams {
            poll_period_ms: 1,
            feedback_every: 5,
            require_pose: true,
            active_timeout_ms: 100,
        }
    }

    fn orchestrator(
        nav: Arc<FakeNav>,
        sink: Arc<RecordingSink>,
    ) -> (Arc<TaskOrchestrator>, Arc<PoseCache>) {
        let cache = Arc::new(PoseCache::new());
        let orch = Arc::new(TaskOrchestrator::new(nav, cache.clone(), sink, params()));
        (orch, cache)
    }

    const GOAL: GoalInput = GoalInput { x: 1.0, y: 1.0 };

    #[tokio::test]
    async fn test_goal_needs_pose() {
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, 1));
        let (orch, cache) = orchestrator(nav.clone(), Arc::default());

        assert!(matches!(
            orch.request_goal(GOAL).await,
            Err(NavMgrError::PoseUnavailable)
        ));
        assert_eq!(nav.starts.load(Ordering::SeqCst), 0);
        assert!(orch.current_task().is_none());

        let mut pose = Pose::default();
        pose.position_m[0] = 0.5;
        cache.update(pose);

        assert_eq!(orch.request_goal(GOAL).await.unwrap(), TaskOutcome::Succeeded);
        assert_eq!(nav.starts.load(Ordering::SeqCst), 1);

        // Path was planned from the cached pose
        let start = nav.last_start.lock().unwrap().clone().unwrap();
        assert_eq!(start.position[0], 0.5);
    }

    #[tokio::test]
    async fn test_backup_needs_no_pose() {
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, 1));
        let (orch, _) = orchestrator(nav, Arc::default());

        let outcome = orch.request_backup(BackupQuery::default()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_outcomes() {
        for (code, outcome) in [
            (NavResultCode::SUCCEEDED, TaskOutcome::Succeeded),
            (NavResultCode::CANCELED, TaskOutcome::Canceled),
            (NavResultCode::FAILED, TaskOutcome::Failed),
            (NavResultCode(99), TaskOutcome::Unknown),
        ]
        .iter()
        {
            let nav = Arc::new(FakeNav::new(*code, 2));
            let sink = Arc::new(RecordingSink::default());
            let (orch, _) = orchestrator(nav, sink.clone());

            assert_eq!(
                orch.request_backup(BackupQuery::default()).await.unwrap(),
                *outcome
            );
            assert_eq!(sink.finished.lock().unwrap()[0], (*outcome, None));
            assert!(orch.current_task().is_none());
        }
    }

    #[tokio::test]
    async fn test_failure_details_reported() {
        let mut nav = FakeNav::new(NavResultCode::FAILED, 1);
        nav.task_error = Some(NavTaskError {
            code: 103,
            msg: "Collision ahead".into(),
        });
        let sink = Arc::new(RecordingSink::default());
        let (orch, _) = orchestrator(Arc::new(nav), sink.clone());

        let outcome = orch.request_backup(BackupQuery::default()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Failed);
        assert_eq!(
            sink.finished.lock().unwrap()[0],
            (TaskOutcome::Failed, Some(103))
        );
    }

    #[tokio::test]
    async fn test_feedback_sampled_every_nth_poll() {
        // Complete on the 12th check, so 11 incomplete polls and samples on polls 5 and 10
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, 12));
        let sink = Arc::new(RecordingSink::default());
        let (orch, _) = orchestrator(nav.clone(), sink.clone());

        orch.request_backup(BackupQuery::default()).await.unwrap();

        assert_eq!(nav.feedback_calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.feedback.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_feedback_failures_dont_abort() {
        let mut nav = FakeNav::new(NavResultCode::SUCCEEDED, 12);
        nav.feedback_fails = true;
        let nav = Arc::new(nav);
        let sink = Arc::new(RecordingSink::default());
        let (orch, _) = orchestrator(nav.clone(), sink.clone());

        let outcome = orch.request_backup(BackupQuery::default()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Succeeded);
        assert_eq!(nav.feedback_calls.load(Ordering::SeqCst), 2);
        assert!(sink.feedback.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_plan_fails_task() {
        let mut nav = FakeNav::new(NavResultCode::SUCCEEDED, 1);
        nav.reject_plan = true;
        let nav = Arc::new(nav);
        let (orch, cache) = orchestrator(nav.clone(), Arc::default());
        cache.update(Pose::default());

        assert_eq!(orch.request_goal(GOAL).await.unwrap(), TaskOutcome::Failed);
        assert_eq!(nav.starts.load(Ordering::SeqCst), 0);
        assert!(orch.current_task().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let mut nav = FakeNav::new(NavResultCode::SUCCEEDED, 1);
        nav.unreachable = true;
        let (orch, _) = orchestrator(Arc::new(nav), Arc::default());

        assert!(matches!(
            orch.request_backup(BackupQuery::default()).await,
            Err(NavMgrError::UpstreamUnavailable(_))
        ));
        // Slot released for the next request
        assert!(orch.current_task().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, 20));
        let (orch, _) = orchestrator(nav.clone(), Arc::default());

        let a = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.request_backup(BackupQuery::default()).await })
        };
        let b = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.request_backup(BackupQuery::default()).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let busy = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(NavMgrError::TaskBusy)))
            .count();
        let ran = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(TaskOutcome::Succeeded)))
            .count();

        assert_eq!(busy, 1);
        assert_eq!(ran, 1);
        assert_eq!(nav.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_leaves_running_task_alone() {
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, usize::MAX));
        let (orch, cache) = orchestrator(nav.clone(), Arc::default());
        cache.update(Pose::default());

        let goal = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.request_goal(GOAL).await })
        };

        // Wait until the goal is running
        loop {
            match orch.current_task() {
                Some(t) if t.state == "running" => {
                    assert_eq!(t.kind, "goal");
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }

        assert!(matches!(
            orch.request_backup(BackupQuery::default()).await,
            Err(NavMgrError::TaskBusy)
        ));
        assert_eq!(nav.starts.load(Ordering::SeqCst), 1);
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 0);

        assert!(orch.cancel().await.unwrap());
        assert_eq!(goal.await.unwrap().unwrap(), TaskOutcome::Canceled);

        // Idempotent once idle
        assert!(!orch.cancel().await.unwrap());
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        use crate::nav_client::sim::{SimNav, SimNavParams};

        // Not active until well after the cancel
        let nav = Arc::new(SimNav::new(SimNavParams {
            speed_ms: 0.01,
            active_after_ms: 150,
        }));
        let sink = Arc::new(RecordingSink::default());
        let orch = Arc::new(TaskOrchestrator::new(
            nav.clone(),
            Arc::new(PoseCache::new()),
            sink.clone(),
            NavMgrParams {
                active_timeout_ms: 1000,
                ..params()
            },
        ));

        let backup = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.request_backup(BackupQuery::default()).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(orch.current_task().unwrap().state, "pending");
        assert!(orch.cancel().await.unwrap());

        assert_eq!(backup.await.unwrap().unwrap(), TaskOutcome::Canceled);
        assert_eq!(
            sink.finished.lock().unwrap().as_slice(),
            &[(TaskOutcome::Canceled, None)]
        );
        assert!(orch.current_task().is_none());

        // The backup was never started on the subsystem
        assert!(nav.get_feedback().await.unwrap().is_none());
        assert_eq!(nav.get_result().await.unwrap(), NavResultCode::UNKNOWN);
    }

    #[tokio::test]
    async fn test_cancel_while_start_in_flight() {
        let mut nav = FakeNav::new(NavResultCode::SUCCEEDED, usize::MAX);
        nav.start_delay = Duration::from_millis(50);
        let nav = Arc::new(nav);
        let (orch, _) = orchestrator(nav.clone(), Arc::default());

        let backup = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.request_backup(BackupQuery::default()).await })
        };

        // Wait for the start to be sent, the subsystem hasn't accepted it yet
        while nav.starts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(orch.cancel().await.unwrap());
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 0);

        // Canceled once the start has been accepted
        assert_eq!(backup.await.unwrap().unwrap(), TaskOutcome::Canceled);
        assert_eq!(nav.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_survives_dropped_request() {
        let nav = Arc::new(FakeNav::new(NavResultCode::SUCCEEDED, 50));
        let sink = Arc::new(RecordingSink::default());
        let (orch, _) = orchestrator(nav, sink.clone());

        // Give up on the request almost immediately, as a disconnecting client would
        let req = orch.request_backup(BackupQuery::default());
        assert!(tokio::time::timeout(Duration::from_millis(2), req)
            .await
            .is_err());

        // The task is still driven to completion and the slot released
        while orch.current_task().is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            sink.finished.lock().unwrap().as_slice(),
            &[(TaskOutcome::Succeeded, None)]
        );
    }
}
