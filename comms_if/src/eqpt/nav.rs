//! # Navigation Equipment Communications Module
//!
//! Requests and replies exchanged with the rover's navigation server over a REQ/REP socket. Every
//! [`NavCmd`] is answered by exactly one [`NavRep`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Frame in which goals and paths are expressed.
pub const MAP_FRAME_ID: &str = "map";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A stamped pose, position in meters and attitude as an `[x, y, z, w]` quaternion.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PoseStamped {
    /// UTC timestamp of the pose
    #[serde(with = "ts_milliseconds")]
    pub stamp: DateTime<Utc>,

    /// Reference frame of the pose
    pub frame_id: String,

    /// Position `[x, y, z]` in meters
    pub position: [f64; 3],

    /// Attitude quaternion `[x, y, z, w]`
    pub orientation: [f64; 4],
}

/// A path computed by the planner.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct NavPath {
    /// Reference frame of all poses in the path
    pub frame_id: String,

    /// Poses along the path, in order
    pub poses: Vec<PoseStamped>,
}

/// Feedback published by the navigation server about the running task.
///
/// Which fields are set depends on the task: path following reports distance to goal and speed,
/// backup reports distance traveled.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct NavFeedback {
    /// Distance traveled since the task started, meters
    pub distance_traveled: Option<f64>,

    /// Estimated distance remaining to the goal, meters
    pub distance_to_goal: Option<f64>,

    /// Current speed of the robot, meters/second
    pub speed: Option<f64>,
}

/// Raw task result code reported by the navigation server.
///
/// Only [`NavResultCode::SUCCEEDED`], [`NavResultCode::CANCELED`] and [`NavResultCode::FAILED`]
/// are meaningful, any other value (including [`NavResultCode::UNKNOWN`]) is unrecognised.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NavResultCode(pub i32);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Commands that can be sent to the navigation server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum NavCmd {
    /// Query whether the navigation stack is up and accepting tasks
    IsActive,

    /// Plan a path between two poses
    ComputePath { start: PoseStamped, goal: PoseStamped },

    /// Smooth a previously planned path
    SmoothPath { path: NavPath },

    /// Start following the given path
    FollowPath { path: NavPath },

    /// Start a straight line backup
    Backup {
        dist_m: f64,
        speed_ms: f64,
        time_allowance_s: u32,
    },

    /// Query whether the current task has finished
    IsTaskComplete,

    /// Get the latest feedback of the current task
    GetFeedback,

    /// Get the result of the last task
    GetResult,

    /// Get the error code and message of the last failed task
    GetTaskError,

    /// Cancel the current task
    CancelTask,
}

/// Replies that can be sent by the navigation server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum NavRep {
    /// The command was accepted
    Accepted,

    /// The command was rejected, with a reason
    Rejected(String),

    /// Whether the navigation stack is active
    Active(bool),

    /// A planned or smoothed path
    Path(NavPath),

    /// Whether the current task is complete
    Complete(bool),

    /// Feedback of the current task, `None` if none has been published yet
    Feedback(Option<NavFeedback>),

    /// Result of the last task
    Result(NavResultCode),

    /// Error details of the last failed task, `None` if the server doesn't provide any
    TaskError(Option<NavTaskError>),
}

/// Error details of a failed navigation task.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NavTaskError {
    pub code: i32,
    pub msg: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavResultCode {
    pub const UNKNOWN: Self = Self(0);
    pub const SUCCEEDED: Self = Self(1);
    pub const CANCELED: Self = Self(2);
    pub const FAILED: Self = Self(3);
}

impl fmt::Display for NavResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCEEDED => write!(f, "SUCCEEDED"),
            Self::CANCELED => write!(f, "CANCELED"),
            Self::FAILED => write!(f, "FAILED"),
            Self(c) => write!(f, "UNRECOGNISED({})", c),
        }
    }
}

impl PoseStamped {
    /// A pose in the map frame at the given position, facing along +X.
    pub fn map_xy(x: f64, y: f64, stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            frame_id: MAP_FRAME_ID.into(),
            position: [x, y, 0.0],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl NavPath {
    /// Length of the path in the XY plane, meters.
    pub fn length_m(&self) -> f64 {
        self.poses
            .windows(2)
            .map(|w| {
                let dx = w[1].position[0] - w[0].position[0];
                let dy = w[1].position[1] - w[0].position[1];
                (dx * dx + dy * dy).sqrt()
            })
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cmd_wire_format() {
        let cmd = NavCmd::Backup {
            dist_m: 0.3,
            speed_ms: 0.2,
            time_allowance_s: 10,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"Backup":{"dist_m":0.3,"speed_ms":0.2,"time_allowance_s":10}}"#
        );

        let rep: NavRep = serde_json::from_str(r#"{"Result":7}"#).unwrap();
        assert_eq!(rep, NavRep::Result(NavResultCode(7)));

        let rep: NavRep = serde_json::from_str(r#""Accepted""#).unwrap();
        assert_eq!(rep, NavRep::Accepted);
    }

    #[test]
    fn test_path_length() {
        let now = Utc::now();
        let path = NavPath {
            frame_id: MAP_FRAME_ID.into(),
            poses: vec![
                PoseStamped::map_xy(0.0, 0.0, now),
                PoseStamped::map_xy(3.0, 4.0, now),
                PoseStamped::map_xy(3.0, 5.0, now),
            ],
        };
        assert!((path.length_m() - 6.0).abs() < 1e-9);
        assert_eq!(NavPath::default().length_m(), 0.0);
    }
}
