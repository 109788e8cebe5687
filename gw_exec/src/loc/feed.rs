//! # Localisation feed
//!
//! The localisation service publishes pose estimates as frequently as it can. The feed subscribes
//! to them on a background thread and overwrites the [`PoseCache`] on every message, independent
//! of any client request.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use comms_if::{
    eqpt::loc::{parse_pose, LOC_POSE_TOPIC},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, RecvTopicError, SocketOptions},
};
use log::{debug, error, info, trace, warn};

use super::{Pose, PoseCache};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Background subscriber to the localisation service.
pub struct LocFeed {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LocFeedError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to the pose topic: {0}")]
    SubscribeError(zmq::Error),
}

/// Why a received message did not update the cache.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PoseMsgError {
    #[error("Message on unexpected topic {0:?}")]
    WrongTopic(String),

    #[error("Could not deserialise the pose: {0}")]
    DeserializeError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LocFeed {
    /// Connect to the localisation publisher and start pumping poses into `cache`.
    ///
    /// The connection is not awaited, the feed picks up poses whenever the publisher comes up.
    pub fn start(
        ctx: &zmq::Context,
        params: &NetParams,
        cache: Arc<PoseCache>,
    ) -> Result<Self, LocFeedError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 0,
            recv_timeout: 100,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, &params.loc_endpoint)
            .map_err(LocFeedError::SocketError)?;
        socket
            .set_subscribe(LOC_POSE_TOPIC.as_bytes())
            .map_err(LocFeedError::SubscribeError)?;

        let bg_run = Arc::new(AtomicBool::new(true));
        let bg_run_clone = bg_run.clone();

        let bg_jh = Some(thread::spawn(move || bg_thread(socket, bg_run_clone, cache)));

        info!("Localisation feed subscribed to {}", params.loc_endpoint);

        Ok(Self { bg_jh, bg_run })
    }

    /// Stop the background thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.bg_run.store(false, Ordering::Relaxed);

        if let Some(jh) = self.bg_jh.take() {
            if jh.join().is_err() {
                warn!("Localisation feed thread panicked");
            }
        }
    }
}

impl Drop for LocFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Apply one `[topic, payload]` message to the cache.
pub(crate) fn handle_pose_msg(
    cache: &PoseCache,
    topic: &str,
    payload: &[u8],
) -> Result<Pose, PoseMsgError> {
    if topic != LOC_POSE_TOPIC {
        return Err(PoseMsgError::WrongTopic(topic.into()));
    }

    let stamped = parse_pose(payload).map_err(PoseMsgError::DeserializeError)?;
    let pose = Pose::from(&stamped);
    cache.update(pose);

    Ok(pose)
}

/// Background thread, updates the cache whenever the localisation service publishes.
fn bg_thread(socket: MonitoredSocket, run: Arc<AtomicBool>, cache: Arc<PoseCache>) {
    let mut num_poses: u64 = 0;

    while run.load(Ordering::Relaxed) {
        let (topic, payload) = match socket.recv_topic(0) {
            Ok(m) => m,
            Err(ref e) if e.is_retryable() => continue,
            Err(RecvTopicError::Malformed(n)) => {
                warn!("Dropping localisation message of {} parts", n);
                continue;
            }
            Err(e) => {
                error!("Error receiving message from the localisation service: {}", e);
                break;
            }
        };

        match handle_pose_msg(&cache, &topic, &payload) {
            Ok(pose) => {
                if num_poses == 0 {
                    info!(
                        "First pose received: ({:.3}, {:.3}) heading {:.1} deg",
                        pose.x(),
                        pose.y(),
                        pose.get_heading().to_degrees()
                    );
                }
                num_poses += 1;
                trace!("Pose update {}: {:?}", num_poses, pose);
            }
            Err(e) => warn!("Dropping localisation message: {}", e),
        }
    }

    debug!("Localisation feed stopped after {} poses", num_poses);
}

#[cfg(test)]
mod test {
    use super::*;

    const POSE_JSON: &[u8] = br#"{"stamp":1700000000000,"frame_id":"map","position":[1.0,2.0,0.0],"orientation":[0.0,0.0,0.0,1.0]}"#;

    #[test]
    fn test_pose_msg_updates_cache() {
        let cache = PoseCache::new();

        let pose = handle_pose_msg(&cache, LOC_POSE_TOPIC, POSE_JSON).unwrap();
        assert_eq!(pose.x(), 1.0);
        assert_eq!(cache.latest(), Some(pose));
    }

    #[test]
    fn test_bad_msgs_leave_cache_alone() {
        let cache = PoseCache::new();

        assert!(matches!(
            handle_pose_msg(&cache, "cmd_vel", POSE_JSON),
            Err(PoseMsgError::WrongTopic(_))
        ));
        // Longer topics share the subscription prefix
        assert!(matches!(
            handle_pose_msg(&cache, "pose_raw", POSE_JSON),
            Err(PoseMsgError::WrongTopic(_))
        ));
        assert!(matches!(
            handle_pose_msg(&cache, "", POSE_JSON),
            Err(PoseMsgError::WrongTopic(_))
        ));
        assert!(matches!(
            handle_pose_msg(&cache, LOC_POSE_TOPIC, b"{}"),
            Err(PoseMsgError::DeserializeError(_))
        ));
        assert!(cache.latest().is_none());
    }
}
