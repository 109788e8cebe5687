//! # Gateway Executable Parameters
//!
//! This module provide parameters for the gateway executable, loaded from `gw_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::NetParams;
use serde::Deserialize;
use std::path::PathBuf;

use crate::{nav_client::sim::SimNavParams, nav_mgr::NavMgrParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GwExecParams {
    /// HTTP server parameters
    pub http: HttpParams,

    /// Rover network endpoints
    pub net: NetParams,

    /// Navigation task parameters
    pub nav: NavMgrParams,

    /// Which navigation subsystem to drive
    pub nav_backend: NavBackend,

    /// Simulated navigation parameters, used when `nav_backend = "Sim"`
    #[serde(default)]
    pub sim: SimNavParams,

    /// Video relay parameters
    pub video: VideoParams,

    /// Map storage parameters
    pub maps: MapParams,

    /// Mapping tool command lines
    pub mapping: MappingParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpParams {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8000`
    pub bind_addr: String,

    /// Time given to open connections to finish once shutdown has started
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoParams {
    /// Topic relayed by `GET /mapping/stream`
    pub mapping_topic: String,

    /// Time to wait for the first chunk of a stream before reporting the upstream unavailable
    pub first_chunk_timeout_ms: u64,

    /// Unterminated frames longer than this are dropped
    pub max_frame_bytes: usize,

    /// Number of chunks buffered between the network thread and the HTTP response
    pub channel_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapParams {
    /// Directory holding the `.pgm`/`.png`/`.yaml` map files. Relative paths are resolved from
    /// the software root.
    pub maps_dir: PathBuf,

    /// Map served by `GET /map/download` when no name is given
    pub default_map: String,
}

/// Command lines of the mapping tools. Each is a program followed by its arguments, `{map}` in an
/// argument is replaced by the map path (without extension).
#[derive(Debug, Clone, Deserialize)]
pub struct MappingParams {
    pub start_cmd: Vec<String>,
    pub save_cmd: Vec<String>,
    pub change_cmd: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Navigation subsystem implementations.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum NavBackend {
    /// The rover's navigation server, over ZMQ
    Zmq,

    /// The built-in simulated navigator
    Sim,
}
