//! # Gateway context
//!
//! Everything a request handler needs, built once at startup and shared by all connections.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    cmd_relay::CommandSink,
    loc::PoseCache,
    map_store::MapStore,
    mapping::MappingMgr,
    nav_mgr::TaskOrchestrator,
    params::VideoParams,
    video_client::VideoSource,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Clone)]
pub struct GwContext {
    /// Latest pose of the robot
    pub pose_cache: Arc<PoseCache>,

    /// Runner of navigation tasks
    pub orchestrator: Arc<TaskOrchestrator>,

    /// Destination of velocity commands
    pub cmd_sink: Arc<dyn CommandSink>,

    /// Source of the camera and mapping video streams
    pub video_source: Arc<dyn VideoSource>,

    pub map_store: Arc<MapStore>,

    pub mapping: Arc<MappingMgr>,

    pub video: VideoParams,

    /// Map served when a download names none
    pub default_map: String,

    /// Cancelled when the gateway shuts down, ends the long lived video and velocity connections
    pub shutdown: CancellationToken,
}
