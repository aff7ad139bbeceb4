//! # Robot state
//!
//! Book keeping behind the controller: connection and power flags, the
//! last known position, the current activity, and the order history that
//! feeds operator reports.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use chrono::Utc;

// Internal
use comms_if::arm::{ActivityState, OrderRecord, Position, StatusReport};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Timestamp format used on order records.
const ORDER_TIMESTAMP_FORMAT: &str = "%H:%M:%S";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Controller side view of the arm.
#[derive(Debug, Clone)]
pub struct RobotState {
    /// Whether the serial link is up and settled
    pub connected: bool,

    /// Whether the stepper drivers are energised
    pub motors_enabled: bool,

    /// Whether the end effector is active
    pub effector_active: bool,

    /// Whether the board interprets coordinates as absolute
    pub absolute_mode: bool,

    /// Last position the arm is known to occupy
    pub position: Position,

    /// What the arm is doing right now
    pub activity: ActivityState,

    /// History of orders and their outcomes, append only, cleared on a
    /// fresh connect
    pub orders: Vec<OrderRecord>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotState {
    /// Snapshot the state into the wire format shared with clients.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            connected: self.connected,
            motors_enabled: self.motors_enabled,
            effector_active: self.effector_active,
            absolute_mode: self.absolute_mode,
            activity: self.activity,
            position: self.position,
        }
    }

    /// Record an order. The history only ever grows within a connection,
    /// reports must see everything that happened since the last connect.
    pub fn push_order(&mut self, username: &str, command: &str, details: String, success: bool) {
        self.orders.push(OrderRecord {
            timestamp: Utc::now().format(ORDER_TIMESTAMP_FORMAT).to_string(),
            username: username.to_string(),
            command: command.to_string(),
            details,
            success,
        });
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            connected: false,
            motors_enabled: false,
            effector_active: false,
            // Boards boot in absolute mode
            absolute_mode: true,
            position: Position::default(),
            activity: ActivityState::Disconnected,
            orders: Vec::new(),
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
    fn test_default_state() {
        let state = RobotState::default();

        assert!(!state.connected);
        assert!(!state.motors_enabled);
        assert!(state.absolute_mode);
        assert_eq!(state.activity, ActivityState::Disconnected);
        assert_eq!(state.position, Position::default());
        assert!(state.orders.is_empty());
    }

    #[test]
    fn test_order_history_is_append_only() {
        let mut state = RobotState::default();

        // A long session keeps every order, nothing is dropped
        for i in 0..500 {
            state.push_order("op", "robot.move", format!("order {}", i), true);
        }

        assert_eq!(state.orders.len(), 500);
        assert_eq!(state.orders[0].details, "order 0");
        assert_eq!(state.orders.last().unwrap().details, "order 499");
    }

    #[test]
    fn test_status_report_mirrors_state() {
        let mut state = RobotState::default();
        state.connected = true;
        state.motors_enabled = true;
        state.activity = ActivityState::InPosition;
        state.position = Position {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        };

        let report = state.status_report();

        assert!(report.connected);
        assert!(report.motors_enabled);
        assert!(!report.effector_active);
        assert_eq!(report.activity, ActivityState::InPosition);
        assert_eq!(report.position.x, 1.0);
    }
}
