//! # G-code module
//!
//! The command vocabulary the control board understands: fixed codes for
//! switching things, rendering of linear moves, parsing of the board's
//! status report, and the geometric envelope check applied before a move
//! is rendered at all.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use regex::Regex;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Length of the shoulder link in mm
pub const SHOULDER_LINK_MM: f64 = 120.0;

/// Length of the elbow link in mm
pub const ELBOW_LINK_MM: f64 = 120.0;

/// Furthest radial distance the effector can reach in mm
pub const MAX_REACH_MM: f64 = SHOULDER_LINK_MM + ELBOW_LINK_MM;

/// Inside this radius the arm is almost folded back on itself
pub const CAUTION_RADIUS_MM: f64 = 1.0;

/// Lowest commandable Z in mm
pub const MIN_Z_MM: f64 = -50.0;

/// Highest commandable Z in mm
pub const MAX_Z_MM: f64 = 240.0;

/// Feed rate used when a move does not specify one, in mm/min
pub const DEFAULT_SPEED: f64 = 2000.0;

/// Enable the stepper motors
pub const CMD_MOTORS_ON: &str = "M17";

/// Disable the stepper motors
pub const CMD_MOTORS_OFF: &str = "M18";

/// Switch the effector on
pub const CMD_EFFECTOR_ON: &str = "M3";

/// Switch the effector off
pub const CMD_EFFECTOR_OFF: &str = "M5";

/// Use absolute coordinates
pub const CMD_ABSOLUTE: &str = "G90";

/// Use relative coordinates
pub const CMD_RELATIVE: &str = "G91";

/// Run a homing cycle
pub const CMD_HOME: &str = "G28";

/// Ask the board for its status
pub const CMD_STATUS: &str = "M114";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Fields recovered from an M114 status report.
///
/// Each field is `None` when the report did not mention it, so stale
/// tracked state is left alone rather than clobbered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusFields {
    pub absolute_mode: Option<bool>,
    pub motors_enabled: Option<bool>,
    pub position: Option<(f64, f64, f64)>,
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Render a linear move to the given position and feed rate.
///
/// Axes are fixed precision, three decimals for position and one for the
/// feed rate: `render_move(10.0, 20.0, 30.0, 500.0)` gives
/// `G1 X10.000 Y20.000 Z30.000 F500.0`. The line carries no terminator,
/// that is added on transmission.
pub fn render_move(x: f64, y: f64, z: f64, speed: f64) -> String {
    format!("G1 X{:.3} Y{:.3} Z{:.3} F{:.1}", x, y, z, speed)
}

/// Check whether a position is inside the arm's reachable envelope.
///
/// The envelope is a cylinder: the horizontal radius is capped at
/// [`MAX_REACH_MM`] (the two links stretched out straight) and Z at the
/// limits of the column. Boundary values are reachable. Positions inside
/// [`CAUTION_RADIUS_MM`] are reachable but logged, the arm has to fold
/// fully back to get there.
pub fn is_reachable(x: f64, y: f64, z: f64) -> bool {
    let radius = (x * x + y * y).sqrt();

    if radius > MAX_REACH_MM {
        warn!(
            "Position ({}, {}, {}) is {:.1} mm out horizontally, beyond the {:.0} mm reach",
            x, y, z, radius, MAX_REACH_MM
        );
        return false;
    }

    if radius < CAUTION_RADIUS_MM {
        warn!(
            "Position ({}, {}, {}) is within {} mm of the shoulder axis",
            x, y, z, CAUTION_RADIUS_MM
        );
    }

    if z < MIN_Z_MM || z > MAX_Z_MM {
        warn!("Z {} is outside [{}, {}]", z, MIN_Z_MM, MAX_Z_MM);
        return false;
    }

    true
}

/// Pull the coordinate mode, motor state and position out of an M114
/// report.
///
/// Works on both the raw and the normalised form of the response, the
/// markers survive either way.
pub fn parse_status(report: &str) -> StatusFields {
    let mut fields = StatusFields::default();

    if report.contains("ABSOLUTE MODE") {
        fields.absolute_mode = Some(true);
    } else if report.contains("RELATIVE MODE") {
        fields.absolute_mode = Some(false);
    }

    if report.contains("MOTORS ENABLED") {
        fields.motors_enabled = Some(true);
    } else if report.contains("MOTORS DISABLED") {
        fields.motors_enabled = Some(false);
    }

    // The position line looks like `[X:5.66 Y:85.14 Z:69.09 E:0.00]`
    let position_re = Regex::new(
        r"X:\s*(-?\d+\.?\d*)\s+Y:\s*(-?\d+\.?\d*)\s+Z:\s*(-?\d+\.?\d*)",
    )
    .unwrap();

    if let Some(caps) = position_re.captures(report) {
        let x = caps[1].parse::<f64>();
        let y = caps[2].parse::<f64>();
        let z = caps[3].parse::<f64>();

        if let (Ok(x), Ok(y), Ok(z)) = (x, y, z) {
            fields.position = Some((x, y, z));
        }
    }

    fields
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_render_move_fixed_precision() {
        assert_eq!(
            render_move(10.0, 20.0, 30.0, 500.0),
            "G1 X10.000 Y20.000 Z30.000 F500.0"
        );
        assert_eq!(
            render_move(-7.5, 0.0, 120.25, 2000.0),
            "G1 X-7.500 Y0.000 Z120.250 F2000.0"
        );
    }

    #[test]
    fn test_reach_radius_boundary() {
        // On the boundary is reachable, beyond it is not
        assert!(is_reachable(240.0, 0.0, 0.0));
        assert!(!is_reachable(240.1, 0.0, 0.0));
        assert!(!is_reachable(170.0, 170.0, 0.0));

        // Z does not count towards the horizontal radius
        assert!(is_reachable(0.0, 100.0, 240.0));
    }

    #[test]
    fn test_z_limits() {
        assert!(is_reachable(0.0, 100.0, -50.0));
        assert!(!is_reachable(0.0, 100.0, -50.1));
        assert!(is_reachable(0.0, 0.0, 240.0));
        assert!(!is_reachable(0.0, 10.0, 241.0));
    }

    #[test]
    fn test_caution_radius_still_reachable() {
        assert!(is_reachable(0.5, 0.0, 0.0));
        assert!(is_reachable(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_parse_status_full_report() {
        let report = "INFO: ABSOLUTE MODE\nINFO: CURRENT POSITION: [X:5.66 Y:85.14 Z:69.09 E:0.00]\nINFO: MOTORS DISABLED\nOK\n";

        let fields = parse_status(report);
        assert_eq!(fields.absolute_mode, Some(true));
        assert_eq!(fields.motors_enabled, Some(false));
        assert_eq!(fields.position, Some((5.66, 85.14, 69.09)));
    }

    #[test]
    fn test_parse_status_normalised_report() {
        // After normalisation the line breaks are gone
        let report = "INFO: RELATIVE MODEINFO: CURRENT POSITION: [X:-12.00 Y:0.50 Z:100.00 E:0.00]INFO: MOTORS ENABLED. OK. ";

        let fields = parse_status(report);
        assert_eq!(fields.absolute_mode, Some(false));
        assert_eq!(fields.motors_enabled, Some(true));
        assert_eq!(fields.position, Some((-12.0, 0.5, 100.0)));
    }

    #[test]
    fn test_parse_status_empty_report() {
        assert_eq!(parse_status("OK"), StatusFields::default());
    }
}
