//! # Operator and admin reports
//!
//! Reports are assembled on demand from the controller's order history
//! and the audit trail, filtered down to what the requesting role may
//! see. Operators get their own orders, admins get everybody's plus the
//! raw audit rows.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

// Internal
use comms_if::arm::OrderRecord;
use util::audit::{self, AuditError, AuditRecord};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Orders issued by one operator since the last connect.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorReport {
    pub username: String,
    pub orders: Vec<OrderRecord>,
    pub error_count: usize,
}

/// Orders issued by everybody since the last connect.
#[derive(Debug, Clone, Serialize)]
pub struct AdminReport {
    pub orders: Vec<OrderRecord>,
    pub error_count: usize,
}

/// Rows pulled from the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct LogReport {
    pub rows: Vec<AuditRecord>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised while assembling a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Unknown filter key {0:?}")]
    UnknownFilterKey(String),

    #[error("Unknown filter value {0:?}")]
    UnknownFilterValue(String),

    #[error("Could not read the audit trail: {0}")]
    AuditReadError(AuditError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the report an operator sees, their own orders only.
pub fn operator_report(username: &str, orders: &[OrderRecord]) -> OperatorReport {
    let orders: Vec<OrderRecord> = orders
        .iter()
        .filter(|o| o.username == username)
        .cloned()
        .collect();

    let error_count = orders.iter().filter(|o| !o.success).count();

    OperatorReport {
        username: username.to_string(),
        orders,
        error_count,
    }
}

/// Build the full order report, optionally filtered.
///
/// Supported filter keys are `user` (exact username) and `outcome`
/// (`ok` or `error`).
pub fn admin_report(
    orders: &[OrderRecord],
    filter: Option<(&str, &str)>,
) -> Result<AdminReport, ReportError> {
    let orders: Vec<OrderRecord> = match filter {
        None => orders.to_vec(),
        Some(("user", value)) => orders
            .iter()
            .filter(|o| o.username == value)
            .cloned()
            .collect(),
        Some(("outcome", value)) => {
            let wanted = outcome_value(value)?;
            orders.iter().filter(|o| o.success == wanted).cloned().collect()
        }
        Some((key, _)) => return Err(ReportError::UnknownFilterKey(key.to_string())),
    };

    let error_count = orders.iter().filter(|o| !o.success).count();

    Ok(AdminReport {
        orders,
        error_count,
    })
}

/// Pull rows from the audit trail, optionally filtered.
///
/// Supported filter keys are `user` (exact username) and `level`
/// (case insensitive audit level name).
pub fn log_report(
    audit_path: &Path,
    filter: Option<(&str, &str)>,
) -> Result<LogReport, ReportError> {
    let rows = audit::read_trail(audit_path).map_err(ReportError::AuditReadError)?;

    let rows = match filter {
        None => rows,
        Some(("user", value)) => rows.into_iter().filter(|r| r.user == value).collect(),
        Some(("level", value)) => rows
            .into_iter()
            .filter(|r| r.level.eq_ignore_ascii_case(value))
            .collect(),
        Some((key, _)) => return Err(ReportError::UnknownFilterKey(key.to_string())),
    };

    Ok(LogReport { rows })
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn outcome_value(value: &str) -> Result<bool, ReportError> {
    match value {
        "ok" => Ok(true),
        "error" => Ok(false),
        other => Err(ReportError::UnknownFilterValue(other.to_string())),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use util::audit::{AuditLevel, AuditTrail};

    fn order(username: &str, command: &str, success: bool) -> OrderRecord {
        OrderRecord {
            timestamp: "12:00:00".into(),
            username: username.into(),
            command: command.into(),
            details: String::new(),
            success,
        }
    }

    fn history() -> Vec<OrderRecord> {
        vec![
            order("op", "robot.move", true),
            order("op", "robot.move", false),
            order("admin", "robot.connect", true),
        ]
    }

    #[test]
    fn test_operator_report_filters_by_user() {
        let report = operator_report("op", &history());

        assert_eq!(report.orders.len(), 2);
        assert_eq!(report.error_count, 1);
        assert!(report.orders.iter().all(|o| o.username == "op"));
    }

    #[test]
    fn test_admin_report_outcome_filter() {
        let report = admin_report(&history(), Some(("outcome", "error"))).unwrap();

        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.orders[0].username, "op");
    }

    #[test]
    fn test_admin_report_unfiltered() {
        let report = admin_report(&history(), None).unwrap();

        assert_eq!(report.orders.len(), 3);
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn test_admin_report_rejects_unknown_filters() {
        assert!(matches!(
            admin_report(&history(), Some(("colour", "red"))),
            Err(ReportError::UnknownFilterKey(_))
        ));
        assert!(matches!(
            admin_report(&history(), Some(("outcome", "maybe"))),
            Err(ReportError::UnknownFilterValue(_))
        ));
    }

    #[test]
    fn test_log_report_level_filter() {
        let mut path = std::env::temp_dir();
        path.push(format!("arm_report_trail_{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut trail = AuditTrail::new(&path, "arm_exec").unwrap();
        trail.record(AuditLevel::Info, "op", "connected").unwrap();
        trail.record(AuditLevel::Error, "op", "move failed").unwrap();
        trail.record(AuditLevel::Info, "admin", "user added").unwrap();

        let report = log_report(&path, Some(("level", "error"))).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].message, "move failed");

        let report = log_report(&path, Some(("user", "op"))).unwrap();
        assert_eq!(report.rows.len(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
