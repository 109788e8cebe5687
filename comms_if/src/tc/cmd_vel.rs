//! # Velocity commands
//!
//! Velocity commands are published on a PUB socket as `[CMD_VEL_TOPIC, json(CmdVel)]`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Topic on which velocity commands are published.
pub const CMD_VEL_TOPIC: &str = "cmd_vel";

/// Frame the commands are expressed in.
pub const BASE_FRAME_ID: &str = "base_link";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A stamped twist in the rover body frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmdVel {
    /// Time at which the command was issued
    #[serde(with = "ts_milliseconds")]
    pub stamp: DateTime<Utc>,

    /// Frame the twist is expressed in
    pub frame_id: String,

    /// Linear velocity `[x, y, z]` in meters/second
    pub linear: [f64; 3],

    /// Angular velocity `[x, y, z]` in radians/second
    pub angular: [f64; 3],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdVel {
    /// Build a planar command: forward speed along X, turn rate about Z.
    pub fn planar(linear_x: f64, angular_z: f64, stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            frame_id: BASE_FRAME_ID.into(),
            linear: [linear_x, 0.0, 0.0],
            angular: [0.0, 0.0, angular_z],
        }
    }
}
