//! # Communications interface crate.
//!
//! Provides the common wire types for the arm control software: the RPC
//! envelopes exchanged between the console and the exec, the arm domain
//! types they carry, the stored task format, and the monitored socket both
//! ends are built on.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm domain types shared between the exec and its clients
pub mod arm;

/// Network module
pub mod net;

/// RPC envelope and method parameter definitions
pub mod rpc;

/// Stored task definitions
pub mod tasks;
