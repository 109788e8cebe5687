//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software, both on the rover side (the
//! navigation, localisation, command and video services) and on the client side (the HTTP schemas).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Request and response schemas of the HTTP/WebSocket gateway
pub mod api;

/// Command and response definitions for equipment (like the navigation server)
pub mod eqpt;

/// Network module
pub mod net;

/// Telecommands sent to the rover
pub mod tc;
