//! # Gateway library.
//!
//! This library holds the components of the navigation gateway, which exposes the rover's
//! navigation stack and video feeds to remote clients over HTTP and WebSocket.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Velocity command client - publishes velocity commands to the rover
pub mod cmd_client;

/// Command relay - turns WebSocket messages into velocity commands
pub mod cmd_relay;

/// Gateway context - the shared state handed to every request handler
pub mod ctx;

/// Gateway - HTTP routes and WebSocket upgrades
pub mod gateway;

/// Localisation module - the latest pose of the rover and the feed keeping it current
pub mod loc;

/// Map store - stored maps and their PNG conversion
pub mod map_store;

/// Mapping manager - launches the external mapping tools
pub mod mapping;

/// Navigation client - interface to the navigation subsystem
pub mod nav_client;

/// Navigation manager - runs navigation tasks one at a time
pub mod nav_mgr;

/// Parameters of the gateway executable
pub mod params;

/// Video client - opens video streams from the rover
pub mod video_client;

/// Video relay - reframes MJPEG byte streams as multipart HTTP responses
pub mod video_relay;
