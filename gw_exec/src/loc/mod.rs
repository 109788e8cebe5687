//! # Localisation module
//!
//! This module holds the rover's latest pose estimate. The estimate is produced by the rover's
//! localisation service and pumped into the [`PoseCache`] by the [`LocFeed`] background thread,
//! while HTTP handlers and the navigation manager read it at any time.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod feed;
pub use feed::{LocFeed, LocFeedError};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::nav::{PoseStamped, MAP_FRAME_ID};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The current pose (position and attitude in the map frame) of the rover.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    /// The position in the map frame
    pub position_m: Vector3<f64>,

    /// The attitude of the rover in the map frame.
    pub attitude_q: UnitQuaternion<f64>,

    /// Time at which the estimate was produced
    pub timestamp: DateTime<Utc>,
}

/// Single slot store of the latest known pose.
///
/// One producer (the localisation feed) overwrites the slot, any number of readers take copies of
/// it. Readers never see a partially written pose, and only ever the latest one.
#[derive(Debug)]
pub struct PoseCache {
    tx: watch::Sender<Option<Pose>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    /// Return the heading (angle to the positive map X axis) of the rover in radians.
    pub fn get_heading(&self) -> f64 {
        self.attitude_q.euler_angles().2
    }

    pub fn x(&self) -> f64 {
        self.position_m[0]
    }

    pub fn y(&self) -> f64 {
        self.position_m[1]
    }

    /// Convert into the stamped wire representation, in the map frame.
    pub fn to_stamped(&self) -> PoseStamped {
        let q = self.attitude_q.quaternion();
        PoseStamped {
            stamp: self.timestamp,
            frame_id: MAP_FRAME_ID.into(),
            position: [self.position_m[0], self.position_m[1], self.position_m[2]],
            orientation: [q.i, q.j, q.k, q.w],
        }
    }
}

impl Default for Pose {
    /// The origin of the map, facing along +X, stamped at the unix epoch.
    fn default() -> Self {
        Self {
            position_m: Vector3::zeros(),
            attitude_q: UnitQuaternion::identity(),
            timestamp: DateTime::<Utc>::from(std::time::UNIX_EPOCH),
        }
    }
}

impl From<&PoseStamped> for Pose {
    fn from(stamped: &PoseStamped) -> Self {
        let [qx, qy, qz, qw] = stamped.orientation;
        let q = Quaternion::new(qw, qx, qy, qz);

        // A degenerate quaternion can't be normalised, treat it as no rotation
        let attitude_q = if q.norm() > f64::EPSILON {
            UnitQuaternion::from_quaternion(q)
        } else {
            UnitQuaternion::identity()
        };

        Self {
            position_m: Vector3::new(
                stamped.position[0],
                stamped.position[1],
                stamped.position[2],
            ),
            attitude_q,
            timestamp: stamped.stamp,
        }
    }
}

impl PoseCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Overwrite the cached pose.
    pub fn update(&self, pose: Pose) {
        self.tx.send_replace(Some(pose));
    }

    /// Get the latest pose, or the default pose if no update has been received yet.
    pub fn read(&self) -> Pose {
        self.latest().unwrap_or_default()
    }

    /// Get the latest pose, or `None` if no update has been received yet.
    pub fn latest(&self) -> Option<Pose> {
        *self.tx.borrow()
    }

    /// Get a receiver which is notified of every update.
    pub fn subscribe(&self) -> watch::Receiver<Option<Pose>> {
        self.tx.subscribe()
    }
}

impl Default for PoseCache {
    fn default() -> Self {
        Self::new()
    }
}
