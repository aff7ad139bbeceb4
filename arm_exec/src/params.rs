//! # Arm Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ArmExecParams {
    /// Endpoint the RPC server binds to
    pub rpc_endpoint: String,

    /// Serial device the arm is attached to
    pub serial_device: String,

    /// Baud rate for the serial link
    pub serial_baud: u32,

    /// Seconds allowed for a control command exchange
    pub ctrl_timeout_s: f64,

    /// Seconds allowed for a move command exchange
    pub move_timeout_s: f64,

    /// Seconds the board is given to settle after the port opens
    pub settle_delay_s: f64,

    /// Path of the user database, relative to the software root
    pub users_file: String,

    /// Path of the task store, relative to the software root
    pub tasks_file: String,
}
