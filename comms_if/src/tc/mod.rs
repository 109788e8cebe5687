//! # Telecommand module
//!
//! This module provides the commands the gateway sends directly to the rover's motion controller.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod cmd_vel;
