//! # Simulated navigation subsystem
//!
//! A stand-in for the rover's navigation server, for running the gateway on the bench. Paths are
//! straight lines, the simulated robot moves along them at a fixed speed and tasks finish when the
//! distance has been covered.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use comms_if::eqpt::nav::{
    NavFeedback, NavPath, NavResultCode, NavTaskError, PoseStamped, MAP_FRAME_ID,
};
use log::debug;
use serde::Deserialize;

use super::{NavClientError, NavSubsystem};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Error code reported when a backup runs out of time.
pub const BACKUP_TIMEOUT_CODE: i32 = 750;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SimNavParams {
    /// Speed of the simulated robot while following a path, meters/second
    pub speed_ms: f64,

    /// Time after creation before the simulated subsystem reports active
    pub active_after_ms: u64,
}

pub struct SimNav {
    params: SimNavParams,
    created: Instant,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    task: Option<SimTask>,
    last_result: NavResultCode,
    last_error: Option<NavTaskError>,
}

#[derive(Debug)]
struct SimTask {
    kind: SimTaskKind,
    started: Instant,
    length_m: f64,
    speed_ms: f64,
    canceled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimTaskKind {
    Follow,
    Backup { time_allowance: Duration },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimNavParams {
    fn default() -> Self {
        Self {
            speed_ms: 0.25,
            active_after_ms: 0,
        }
    }
}

impl SimNav {
    pub fn new(params: SimNavParams) -> Self {
        Self {
            params,
            created: Instant::now(),
            state: Mutex::new(SimState {
                task: None,
                last_result: NavResultCode::UNKNOWN,
                last_error: None,
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SimState>, NavClientError> {
        self.state.lock().map_err(|_| NavClientError::Poisoned)
    }

    fn start_task(&self, task: SimTask) -> Result<(), NavClientError> {
        let mut state = self.state()?;

        // A new task preempts the running one
        if state.task.is_some() {
            debug!("SimNav: preempting running task");
        }
        debug!(
            "SimNav: starting {:?} task over {:.2} m",
            task.kind, task.length_m
        );

        state.task = Some(task);
        state.last_result = NavResultCode::UNKNOWN;
        state.last_error = None;

        Ok(())
    }
}

impl SimTask {
    /// Distance covered so far.
    fn traveled_m(&self, now: Instant) -> f64 {
        let elapsed_s = now.saturating_duration_since(self.started).as_secs_f64();
        (elapsed_s * self.speed_ms).min(self.length_m)
    }

    /// The outcome of the task at `now`, or `None` while it is still running.
    fn outcome(&self, now: Instant) -> Option<(NavResultCode, Option<NavTaskError>)> {
        if self.canceled {
            return Some((NavResultCode::CANCELED, None));
        }

        if self.traveled_m(now) >= self.length_m {
            return Some((NavResultCode::SUCCEEDED, None));
        }

        if let SimTaskKind::Backup { time_allowance } = self.kind {
            if now.saturating_duration_since(self.started) >= time_allowance {
                return Some((
                    NavResultCode::FAILED,
                    Some(NavTaskError {
                        code: BACKUP_TIMEOUT_CODE,
                        msg: "Backup exceeded its time allowance".into(),
                    }),
                ));
            }
        }

        None
    }
}

#[async_trait]
impl NavSubsystem for SimNav {
    async fn is_active(&self) -> Result<bool, NavClientError> {
        Ok(self.created.elapsed() >= Duration::from_millis(self.params.active_after_ms))
    }

    async fn compute_path(
        &self,
        start: PoseStamped,
        goal: PoseStamped,
    ) -> Result<NavPath, NavClientError> {
        if goal.position.iter().any(|p| !p.is_finite()) {
            return Err(NavClientError::Rejected("Goal is not reachable".into()));
        }

        Ok(NavPath {
            frame_id: MAP_FRAME_ID.into(),
            poses: vec![start, goal],
        })
    }

    async fn smooth_path(&self, path: NavPath) -> Result<NavPath, NavClientError> {
        // Straight lines are already smooth
        Ok(path)
    }

    async fn follow_path(&self, path: NavPath) -> Result<(), NavClientError> {
        if path.poses.is_empty() {
            return Err(NavClientError::Rejected("Path is empty".into()));
        }

        self.start_task(SimTask {
            kind: SimTaskKind::Follow,
            started: Instant::now(),
            length_m: path.length_m(),
            speed_ms: self.params.speed_ms,
            canceled: false,
        })
    }

    async fn backup(
        &self,
        dist_m: f64,
        speed_ms: f64,
        time_allowance_s: u32,
    ) -> Result<(), NavClientError> {
        if !dist_m.is_finite() || !speed_ms.is_finite() || speed_ms == 0.0 {
            return Err(NavClientError::Rejected(format!(
                "Invalid backup of {} m at {} m/s",
                dist_m, speed_ms
            )));
        }

        self.start_task(SimTask {
            kind: SimTaskKind::Backup {
                time_allowance: Duration::from_secs(time_allowance_s as u64),
            },
            started: Instant::now(),
            length_m: dist_m.abs(),
            speed_ms: speed_ms.abs(),
            canceled: false,
        })
    }

    async fn is_task_complete(&self) -> Result<bool, NavClientError> {
        let mut state = self.state()?;

        let outcome = match state.task {
            Some(ref t) => t.outcome(Instant::now()),
            None => return Ok(true),
        };

        match outcome {
            Some((result, error)) => {
                debug!("SimNav: task finished with {}", result);
                state.task = None;
                state.last_result = result;
                state.last_error = error;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_feedback(&self) -> Result<Option<NavFeedback>, NavClientError> {
        let state = self.state()?;

        Ok(state.task.as_ref().map(|t| {
            let traveled = t.traveled_m(Instant::now());
            NavFeedback {
                distance_traveled: Some(traveled),
                distance_to_goal: Some(t.length_m - traveled),
                speed: Some(t.speed_ms),
            }
        }))
    }

    async fn get_result(&self) -> Result<NavResultCode, NavClientError> {
        Ok(self.state()?.last_result)
    }

    async fn get_task_error(&self) -> Result<Option<NavTaskError>, NavClientError> {
        Ok(self.state()?.last_error.clone())
    }

    async fn cancel_task(&self) -> Result<(), NavClientError> {
        let mut state = self.state()?;
        if let Some(t) = state.task.as_mut() {
            t.canceled = true;
        }
        Ok(())
    }
}
