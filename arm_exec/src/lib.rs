//! # Arm exec library.
//!
//! This library exposes the modules making up the arm control executable so
//! that tests and other crates in the workspace can drive them directly.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// User database, roles and login sessions
pub mod auth;

/// G-code rendering, status parsing and the reach envelope
pub mod gcode;

/// Parameters for the arm executable
pub mod params;

/// Command/response exchange with the control board
pub mod protocol;

/// Activity report builders
pub mod report;

/// The arm controller state machine
pub mod robot;

/// RPC surface served to consoles
pub mod rpc_server;

/// Serial link to the control board
pub mod serial;

/// Stored task management and replay
pub mod task_mgr;
