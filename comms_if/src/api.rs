//! # Gateway API schemas
//!
//! Bodies and query strings of the HTTP routes, and the messages accepted on the velocity
//! WebSocket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Status strings reported for finished navigation tasks.
///
/// Note `succeded` is spelled the way existing clients expect it.
pub mod status {
    pub const SUCCEEDED: &str = "succeded";
    pub const CANCELED: &str = "canceled";
    pub const FAILED: &str = "failed";
    pub const UNKNOWN: &str = "unknown";

    /// Reported when a task is requested while another is running.
    pub const BUSY: &str = "stop the running task.";

    pub const STARTED: &str = "started";
    pub const STOPPED: &str = "stopped";
    pub const NOT_RUNNING: &str = "not running";
    pub const SAVED: &str = "saved";
    pub const CHANGED: &str = "changed";
}

/// Default distance of a backup, meters.
pub const DEFAULT_BACKUP_DIST_M: f64 = 0.30;

/// Default speed of a backup, meters/second.
pub const DEFAULT_BACKUP_SPEED_MS: f64 = 0.2;

/// Default time allowance of a backup, seconds.
pub const DEFAULT_TIME_ALLOWANCE_S: u32 = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Body of `POST /robot/goal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GoalInput {
    pub x: f64,
    pub y: f64,
}

/// Generic `{status}` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub status: String,
}

/// Body of `GET /robot/position`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionOutput {
    pub x: f64,
    pub y: f64,
}

/// Query of `GET /voice/backup`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BackupQuery {
    #[serde(default = "default_backup_dist")]
    pub backup_dist: f64,

    #[serde(default = "default_backup_speed")]
    pub backup_speed: f64,

    #[serde(default = "default_time_allowance")]
    pub time_allowance: u32,
}

/// Query of `GET /map/download`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MapNameQuery {
    pub map_name: Option<String>,
}

/// Body of `POST /mapping/save` and `POST /map/change`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapNameInput {
    pub map_name: String,
}

/// Query of `GET /camera/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicQuery {
    pub topic: String,
}

/// Body of `GET /map/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapList {
    pub maps: Vec<String>,
}

/// Body of `GET /robot/task` while a task is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    pub id: u64,
    pub kind: String,
    pub state: String,
    pub elapsed_s: f64,
}

/// A velocity message received on the `/robot/velocity` WebSocket.
///
/// Missing fields default to zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct VelocityMsg {
    #[serde(default)]
    pub linear: f64,

    #[serde(default)]
    pub angular: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Status {
    pub fn new<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
        }
    }
}

impl Default for BackupQuery {
    fn default() -> Self {
        Self {
            backup_dist: DEFAULT_BACKUP_DIST_M,
            backup_speed: DEFAULT_BACKUP_SPEED_MS,
            time_allowance: DEFAULT_TIME_ALLOWANCE_S,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_backup_dist() -> f64 {
    DEFAULT_BACKUP_DIST_M
}

fn default_backup_speed() -> f64 {
    DEFAULT_BACKUP_SPEED_MS
}

fn default_time_allowance() -> u32 {
    DEFAULT_TIME_ALLOWANCE_S
}
