//! # Robot controller
//!
//! Gates every order against the arm's state before a byte touches the
//! wire, drives the board through the protocol engine and keeps the
//! cached state in step with what the hardware last reported.
//!
//! The controller is designed to sit behind a mutex shared by the RPC
//! workers. The board is half duplex and stateful so at most one command
//! may be in flight at any time, and the cached state must only change
//! under the same lock as the hardware access.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{info, warn};
use std::thread;
use std::time::Duration;
use thiserror::Error;

// Internal
use crate::gcode;
use crate::params::ArmExecParams;
use crate::protocol::{self, ProtocolError};
use crate::serial::{LinkError, SerialLink};
use comms_if::arm::{ActivityState, OrderRecord, Position, StatusReport};

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod state;

pub use self::state::RobotState;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default timeout on short control exchanges.
const DEFAULT_CTRL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout on motion exchanges, movement takes longer to finish
/// than an M-code acknowledgment.
const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default delay between opening the link and first use. Opening the port
/// resets the board, which then chatters while it boots.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Timing configuration for the controller.
#[derive(Debug, Clone, Copy)]
pub struct RobotConfig {
    /// Timeout on short control exchanges
    pub ctrl_timeout: Duration,

    /// Timeout on motion exchanges
    pub move_timeout: Duration,

    /// Delay between opening the link and the input flush
    pub settle_delay: Duration,
}

/// Stateful driver for the arm.
///
/// Generic over the link so tests can substitute a scripted transport for
/// the USB serial port.
pub struct RobotController<L: SerialLink> {
    link: L,
    config: RobotConfig,
    state: RobotState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by controller operations.
#[derive(Debug, Error)]
pub enum RobotError {
    #[error("Already connected to the arm")]
    AlreadyConnected,

    #[error("Not connected to the arm")]
    NotConnected,

    #[error("The motors are already enabled")]
    MotorsAlreadyEnabled,

    #[error("The motors are not enabled")]
    MotorsNotEnabled,

    #[error("Cannot accept orders while the arm is {0}")]
    Busy(ActivityState),

    #[error("Target ({0:.3}, {1:.3}, {2:.3}) is outside the reachable envelope")]
    Unreachable(f64, f64, f64),

    #[error("Link failure: {0}")]
    Link(LinkError),

    #[error("The board rejected the command: {0}")]
    Device(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotConfig {
    /// Build a config from the exec's parameter file.
    pub fn from_params(params: &ArmExecParams) -> Self {
        Self {
            ctrl_timeout: Duration::from_secs_f64(params.ctrl_timeout_s),
            move_timeout: Duration::from_secs_f64(params.move_timeout_s),
            settle_delay: Duration::from_secs_f64(params.settle_delay_s),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            ctrl_timeout: DEFAULT_CTRL_TIMEOUT,
            move_timeout: DEFAULT_MOVE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl<L: SerialLink> RobotController<L> {
    /// Create a new controller over the given link.
    ///
    /// The controller starts disconnected with motors off, absolute mode
    /// assumed and the position at the origin.
    pub fn new(link: L, config: RobotConfig) -> Self {
        Self {
            link,
            config,
            state: RobotState::default(),
        }
    }

    /// Read access to the controller's view of the arm.
    pub fn state(&self) -> &RobotState {
        &self.state
    }

    /// Snapshot of the cached state in the wire format.
    pub fn status_report(&self) -> StatusReport {
        self.state.status_report()
    }

    /// Orders recorded since the last connect.
    pub fn orders(&self) -> &[OrderRecord] {
        &self.state.orders
    }

    /// Record an externally invoked order and its outcome.
    pub fn record_order(&mut self, username: &str, command: &str, details: String, success: bool) {
        self.state.push_order(username, command, details, success);
    }

    /// Open the link and bring the arm to the ready state.
    ///
    /// Waits for the board's boot chatter to finish, then drops it from
    /// the input buffer. A fresh connection starts a fresh order history.
    pub fn connect(&mut self, device: &str, baud: u32) -> Result<(), RobotError> {
        if self.state.connected {
            return Err(RobotError::AlreadyConnected);
        }

        self.link.open(device, baud).map_err(RobotError::Link)?;

        thread::sleep(self.config.settle_delay);

        if let Err(e) = self.link.flush_input() {
            self.link.close();
            return Err(RobotError::Link(e));
        }

        self.state.connected = true;
        self.state.activity = ActivityState::Connected;
        self.state.orders.clear();

        info!("Connected to the arm on {} at {} baud", device, baud);

        Ok(())
    }

    /// Close the link and return to the disconnected state.
    ///
    /// Energised motors are powered down first on a best effort basis,
    /// the link still closes if the board does not answer.
    pub fn disconnect(&mut self) -> Result<(), RobotError> {
        if !self.state.connected {
            return Err(RobotError::NotConnected);
        }

        if self.state.motors_enabled {
            if let Err(e) = self.exchange_ctrl(gcode::CMD_MOTORS_OFF) {
                warn!("Could not power down the motors before closing: {}", e);
            }
        }

        self.link.close();

        self.state.connected = false;
        self.state.motors_enabled = false;
        self.state.effector_active = false;
        self.state.activity = ActivityState::Disconnected;

        info!("Disconnected from the arm");

        Ok(())
    }

    /// Energise the stepper drivers.
    pub fn enable_motors(&mut self) -> Result<(), RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        if self.state.motors_enabled {
            return Err(RobotError::MotorsAlreadyEnabled);
        }

        self.toggle_motors(true, gcode::CMD_MOTORS_ON)
    }

    /// De-energise the stepper drivers.
    pub fn disable_motors(&mut self) -> Result<(), RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        if !self.state.motors_enabled {
            return Err(RobotError::MotorsNotEnabled);
        }

        self.toggle_motors(false, gcode::CMD_MOTORS_OFF)
    }

    /// Switch the end effector on or off.
    pub fn set_effector(&mut self, active: bool) -> Result<(), RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        let command = if active {
            gcode::CMD_EFFECTOR_ON
        } else {
            gcode::CMD_EFFECTOR_OFF
        };

        self.exchange_ctrl(command)?;
        self.state.effector_active = active;

        Ok(())
    }

    /// Select absolute or relative coordinate interpretation.
    ///
    /// The local flag tracks the request rather than the acknowledgment
    /// since the ack text varies between firmware builds. A failure
    /// sentinel still raises, with the flag left as requested.
    pub fn set_coordinate_mode(&mut self, absolute: bool) -> Result<(), RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        self.state.absolute_mode = absolute;

        let command = if absolute {
            gcode::CMD_ABSOLUTE
        } else {
            gcode::CMD_RELATIVE
        };

        self.exchange_ctrl(command)?;

        Ok(())
    }

    /// Move the effector to a target position.
    ///
    /// An exact origin target runs a homing cycle instead of a rendered
    /// move. Any other target is checked against the reachable envelope
    /// before a byte is sent. Motion uses the extended timeout. A failed
    /// exchange leaves the activity at [`ActivityState::Error`], after
    /// which the caller must reconnect or home again.
    pub fn move_to(&mut self, x: f64, y: f64, z: f64, speed: Option<f64>) -> Result<(), RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        if !self.state.motors_enabled {
            return Err(RobotError::MotorsNotEnabled);
        }

        let homing = x == 0.0 && y == 0.0 && z == 0.0;

        let command = if homing {
            self.state.activity = ActivityState::Homing;
            gcode::CMD_HOME.to_string()
        } else {
            if !gcode::is_reachable(x, y, z) {
                return Err(RobotError::Unreachable(x, y, z));
            }

            self.state.activity = ActivityState::Moving;
            gcode::render_move(x, y, z, speed.unwrap_or(gcode::DEFAULT_SPEED))
        };

        match protocol::exchange(&mut self.link, &command, self.config.move_timeout) {
            Ok(response) => {
                self.state.position = Position { x, y, z };
                self.state.activity = ActivityState::InPosition;
                info!("Move complete: {}", response);
                Ok(())
            }
            Err(e) => {
                self.state.activity = ActivityState::Error;
                Err(wrap_protocol(e))
            }
        }
    }

    /// Current status, refreshed from the board when connected.
    ///
    /// Disconnected controllers answer from the cache without touching
    /// the link. Only fields the board actually reported overwrite the
    /// cache.
    pub fn query_status(&mut self) -> Result<StatusReport, RobotError> {
        if !self.state.connected {
            return Ok(self.state.status_report());
        }

        let response = self.exchange_ctrl(gcode::CMD_STATUS)?;
        let fields = gcode::parse_status(&response);

        if let Some(absolute) = fields.absolute_mode {
            self.state.absolute_mode = absolute;
        }
        if let Some(enabled) = fields.motors_enabled {
            self.state.motors_enabled = enabled;
        }
        if let Some((x, y, z)) = fields.position {
            self.state.position = Position { x, y, z };
        }

        Ok(self.state.status_report())
    }

    /// Pass one raw G-code line straight through to the board.
    ///
    /// Used by task replay. Gated on connection only, a task may hold
    /// pure query or mode lines that are valid with the motors off. The
    /// line gets the motion timeout since task lines are mostly moves.
    pub fn send_raw(&mut self, line: &str) -> Result<String, RobotError> {
        self.require_connected()?;
        self.require_idle()?;

        protocol::exchange(&mut self.link, line, self.config.move_timeout).map_err(wrap_protocol)
    }

    /// Flip the motor flag, rolling back if the exchange fails.
    fn toggle_motors(&mut self, enabled: bool, command: &str) -> Result<(), RobotError> {
        let previous = self.state.motors_enabled;
        self.state.motors_enabled = enabled;

        if let Err(e) = self.exchange_ctrl(command) {
            self.state.motors_enabled = previous;
            return Err(e);
        }

        Ok(())
    }

    /// Run one exchange with the control command timeout.
    fn exchange_ctrl(&mut self, command: &str) -> Result<String, RobotError> {
        protocol::exchange(&mut self.link, command, self.config.ctrl_timeout).map_err(wrap_protocol)
    }

    fn require_connected(&self) -> Result<(), RobotError> {
        if self.state.connected {
            Ok(())
        } else {
            Err(RobotError::NotConnected)
        }
    }

    fn require_idle(&self) -> Result<(), RobotError> {
        match self.state.activity {
            ActivityState::Moving | ActivityState::Homing => {
                Err(RobotError::Busy(self.state.activity))
            }
            _ => Ok(()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn wrap_protocol(error: ProtocolError) -> RobotError {
    match error {
        ProtocolError::LinkFailed(e) => RobotError::Link(e),
        ProtocolError::Device(message) => RobotError::Device(message),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted link standing in for the USB port.
    struct FakeLink {
        open: bool,
        opens: usize,
        chunks: VecDeque<Vec<u8>>,
        written: Vec<String>,
    }

    impl FakeLink {
        fn new() -> Self {
            Self {
                open: false,
                opens: 0,
                chunks: VecDeque::new(),
                written: Vec::new(),
            }
        }

        /// Queue a response returned in full on the next read poll.
        fn push_response(&mut self, response: &str) {
            self.chunks.push_back(response.as_bytes().to_vec());
        }
    }

    impl SerialLink for FakeLink {
        fn open(&mut self, _device: &str, _baud: u32) -> Result<(), LinkError> {
            if self.open {
                return Err(LinkError::AlreadyOpen);
            }
            self.open = true;
            self.opens += 1;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
            self.written.push(String::from_utf8_lossy(data).to_string());
            Ok(())
        }

        fn read(&mut self, _window: Duration) -> Result<Vec<u8>, LinkError> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        fn flush_input(&mut self) -> Result<(), LinkError> {
            self.chunks.clear();
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    fn test_config() -> RobotConfig {
        RobotConfig {
            ctrl_timeout: Duration::from_millis(50),
            move_timeout: Duration::from_millis(50),
            settle_delay: Duration::from_millis(0),
        }
    }

    fn connected_controller() -> RobotController<FakeLink> {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());
        ctrl.connect("/dev/ttyUSB0", 115200).unwrap();
        ctrl
    }

    fn powered_controller() -> RobotController<FakeLink> {
        let mut ctrl = connected_controller();
        ctrl.link.push_response("INFO: MOTORS ENABLED\r\nOK\r\n");
        ctrl.enable_motors().unwrap();
        ctrl
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());

        ctrl.connect("/dev/ttyUSB0", 115200).unwrap();
        assert_eq!(ctrl.state.activity, ActivityState::Connected);

        assert!(matches!(
            ctrl.connect("/dev/ttyUSB0", 115200),
            Err(RobotError::AlreadyConnected)
        ));
        assert_eq!(ctrl.link.opens, 1);
    }

    #[test]
    fn test_connect_clears_order_history() {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());
        ctrl.record_order("op", "robot.connect", "stale entry".into(), false);

        ctrl.connect("/dev/ttyUSB0", 115200).unwrap();

        assert!(ctrl.state.orders.is_empty());
    }

    #[test]
    fn test_enable_motors_writes_command() {
        let mut ctrl = connected_controller();
        ctrl.link.push_response("INFO: MOTORS ENABLED\r\nOK\r\n");

        ctrl.enable_motors().unwrap();

        assert!(ctrl.state.motors_enabled);
        assert_eq!(ctrl.link.written, vec!["M17\r\n".to_string()]);
    }

    #[test]
    fn test_enable_motors_blocked_while_moving() {
        let mut ctrl = connected_controller();
        ctrl.state.activity = ActivityState::Moving;

        assert!(matches!(
            ctrl.enable_motors(),
            Err(RobotError::Busy(ActivityState::Moving))
        ));
        assert!(ctrl.link.written.is_empty());
    }

    #[test]
    fn test_motor_toggle_rolls_back_on_device_error() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("ERROR: driver fault\r\nOK\r\n");

        assert!(matches!(ctrl.disable_motors(), Err(RobotError::Device(_))));
        assert!(ctrl.state.motors_enabled);
    }

    #[test]
    fn test_move_updates_position() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("OK\r\n");

        ctrl.move_to(40.0, 50.0, 60.0, Some(1500.0)).unwrap();

        assert_eq!(ctrl.state.activity, ActivityState::InPosition);
        assert_eq!(
            ctrl.state.position,
            Position {
                x: 40.0,
                y: 50.0,
                z: 60.0
            }
        );
        assert_eq!(
            ctrl.link.written.last().unwrap(),
            "G1 X40.000 Y50.000 Z60.000 F1500.0\r\n"
        );
    }

    #[test]
    fn test_move_to_origin_homes() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("INFO: HOMING\r\nOK\r\n");

        ctrl.move_to(0.0, 0.0, 0.0, None).unwrap();

        assert_eq!(ctrl.link.written.last().unwrap(), "G28\r\n");
        assert_eq!(ctrl.state.activity, ActivityState::InPosition);
        assert_eq!(ctrl.state.position, Position::default());
    }

    #[test]
    fn test_move_device_error_faults_the_arm() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("ERROR bad range\r\nOK\r\n");

        match ctrl.move_to(10.0, 0.0, 50.0, None) {
            Err(RobotError::Device(message)) => assert_eq!(message, "bad range"),
            other => panic!("expected a device error, got {:?}", other),
        }

        assert_eq!(ctrl.state.activity, ActivityState::Error);
    }

    #[test]
    fn test_move_unreachable_is_rejected() {
        let mut ctrl = powered_controller();

        assert!(matches!(
            ctrl.move_to(250.0, 0.0, 50.0, None),
            Err(RobotError::Unreachable(_, _, _))
        ));

        // Only the motor enable ever reached the wire
        assert_eq!(ctrl.link.written.len(), 1);
        assert_eq!(ctrl.state.activity, ActivityState::Connected);
    }

    #[test]
    fn test_move_requires_motors() {
        let mut ctrl = connected_controller();

        assert!(matches!(
            ctrl.move_to(10.0, 10.0, 50.0, None),
            Err(RobotError::MotorsNotEnabled)
        ));
        assert!(ctrl.link.written.is_empty());
    }

    #[test]
    fn test_status_query_parses_report() {
        let mut ctrl = connected_controller();
        ctrl.link.push_response(
            "INFO: ABSOLUTE MODE\nINFO: CURRENT POSITION: [X:5.66 Y:85.14 Z:69.09]\nINFO: MOTORS DISABLED\nOK\n",
        );

        let report = ctrl.query_status().unwrap();

        assert!(report.absolute_mode);
        assert!(!report.motors_enabled);
        assert_eq!(
            report.position,
            Position {
                x: 5.66,
                y: 85.14,
                z: 69.09
            }
        );
        assert_eq!(ctrl.link.written.last().unwrap(), "M114\r\n");
    }

    #[test]
    fn test_status_query_offline_uses_cache() {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());
        ctrl.state.position = Position {
            x: 7.0,
            y: 8.0,
            z: 9.0,
        };

        let report = ctrl.query_status().unwrap();

        assert!(!report.connected);
        assert_eq!(report.position.x, 7.0);
        assert!(ctrl.link.written.is_empty());
    }

    #[test]
    fn test_disconnect_powers_down() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("INFO: MOTORS DISABLED\r\nOK\r\n");

        ctrl.disconnect().unwrap();

        assert!(!ctrl.state.connected);
        assert!(!ctrl.state.motors_enabled);
        assert_eq!(ctrl.state.activity, ActivityState::Disconnected);
        assert!(!ctrl.link.is_open());
        assert_eq!(ctrl.link.written.last().unwrap(), "M18\r\n");
    }

    #[test]
    fn test_disconnect_requires_connection() {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());

        assert!(matches!(ctrl.disconnect(), Err(RobotError::NotConnected)));
    }

    #[test]
    fn test_send_raw_passthrough() {
        let mut ctrl = powered_controller();
        ctrl.link.push_response("OK\r\n");

        let response = ctrl.send_raw("G1 X5.000 Y5.000 Z50.000 F1000.0").unwrap();

        assert_eq!(response, ". OK. ");
        assert_eq!(
            ctrl.link.written.last().unwrap(),
            "G1 X5.000 Y5.000 Z50.000 F1000.0\r\n"
        );
    }

    #[test]
    fn test_send_raw_allowed_with_motors_off() {
        // Query and mode lines are valid without motor power
        let mut ctrl = connected_controller();
        ctrl.link.push_response("INFO: MOTORS DISABLED\r\nOK\r\n");

        ctrl.send_raw("M114").unwrap();

        assert_eq!(ctrl.link.written.last().unwrap(), "M114\r\n");
    }

    #[test]
    fn test_send_raw_requires_connection() {
        let mut ctrl = RobotController::new(FakeLink::new(), test_config());

        assert!(matches!(ctrl.send_raw("G90"), Err(RobotError::NotConnected)));
        assert!(ctrl.link.written.is_empty());
    }

    #[test]
    fn test_coordinate_mode_is_optimistic() {
        let mut ctrl = connected_controller();
        ctrl.link.push_response("ERROR: unsupported\r\nOK\r\n");

        assert!(ctrl.set_coordinate_mode(false).is_err());

        // The flag follows the request even though the board refused
        assert!(!ctrl.state.absolute_mode);
        assert_eq!(ctrl.link.written.last().unwrap(), "G91\r\n");
    }

    #[test]
    fn test_effector_toggle() {
        let mut ctrl = connected_controller();

        ctrl.link.push_response("OK\r\n");
        ctrl.set_effector(true).unwrap();
        assert!(ctrl.state.effector_active);
        assert_eq!(ctrl.link.written.last().unwrap(), "M3\r\n");

        ctrl.link.push_response("OK\r\n");
        ctrl.set_effector(false).unwrap();
        assert!(!ctrl.state.effector_active);
        assert_eq!(ctrl.link.written.last().unwrap(), "M5\r\n");
    }
}
