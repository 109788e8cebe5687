//! # NavMgr Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NavMgrParams {
    /// Period between two completion checks of the running task
    pub poll_period_ms: u64,

    /// Feedback is sampled every `feedback_every` completion checks. Zero disables sampling.
    pub feedback_every: u64,

    /// If true goals are refused until the first pose has been received
    pub require_pose: bool,

    /// Maximum time to wait for the navigation subsystem to become active
    pub active_timeout_ms: u64,
}
