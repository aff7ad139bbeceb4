//! # Arm domain types
//!
//! Types describing the arm itself, shared between the exec and its
//! clients so both sides agree on what a status report or order record
//! looks like on the wire.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position of the effector in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Snapshot of the controller's view of the arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub connected: bool,
    pub motors_enabled: bool,
    pub effector_active: bool,
    pub absolute_mode: bool,
    pub activity: ActivityState,
    pub position: Position,
}

/// One recorded order and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Wall clock time of the order, `%H:%M:%S`
    pub timestamp: String,

    /// User who issued the order
    pub username: String,

    /// RPC method name, e.g. `robot.move`
    pub command: String,

    /// Human readable description of what was asked for
    pub details: String,

    /// Whether the order completed
    pub success: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the arm is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    Disconnected,
    Connected,
    Moving,
    InPosition,
    Homing,
    Error,
}

/// Role a user holds on the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Operator,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Disconnected => "DISCONNECTED",
            ActivityState::Connected => "CONNECTED",
            ActivityState::Moving => "MOVING",
            ActivityState::InPosition => "IN_POSITION",
            ActivityState::Homing => "HOMING",
            ActivityState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Operator => "operator",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "operator" => Ok(UserRole::Operator),
            other => Err(format!("unknown role `{}`, expected `admin` or `operator`", other)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_activity_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActivityState::InPosition).unwrap(),
            "\"IN_POSITION\""
        );
        assert_eq!(
            serde_json::from_str::<ActivityState>("\"HOMING\"").unwrap(),
            ActivityState::Homing
        );
    }

    #[test]
    fn test_user_role_parsing() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("operator".parse::<UserRole>().unwrap(), UserRole::Operator);
        assert!("root".parse::<UserRole>().is_err());
    }
}
