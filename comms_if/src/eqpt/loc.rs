//! # Localisation Equipment Communications Module
//!
//! The localisation service publishes the rover's pose estimate on a PUB socket as
//! `[LOC_POSE_TOPIC, json(PoseStamped)]` messages.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use super::nav::PoseStamped;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Topic on which pose estimates are published.
pub const LOC_POSE_TOPIC: &str = "pose";

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse the payload of a pose message.
pub fn parse_pose(payload: &[u8]) -> Result<PoseStamped, serde_json::Error> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_pose() {
        let pose = parse_pose(
            br#"{"stamp":1700000000000,"frame_id":"map","position":[1.0,2.0,0.0],"orientation":[0.0,0.0,0.0,1.0]}"#,
        )
        .unwrap();
        assert_eq!(pose.position, [1.0, 2.0, 0.0]);
        assert_eq!(pose.stamp.timestamp(), 1_700_000_000);

        assert!(parse_pose(b"not json").is_err());
    }
}
