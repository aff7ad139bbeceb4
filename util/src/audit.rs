//! # Audit trail
//!
//! Operations performed through the RPC surface are recorded to a CSV file
//! in the session directory, one row per operation, so that a run can be
//! reviewed after the fact. The trail is separate from the log file: the
//! log is for the software, the trail is for the people driving it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::Utc;
use csv;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A chrono format string used to timestamp audit rows.
const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d | %H:%M:%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub user: String,
    pub node: String,
}

/// Append-only CSV writer for one session's audit trail.
pub struct AuditTrail {
    path: PathBuf,
    node: String,
    writer: csv::Writer<File>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Severity of an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

/// Errors associated with the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Cannot open the audit file: {0}")]
    OpenError(std::io::Error),

    #[error("Cannot write to the audit file: {0}")]
    WriteError(csv::Error),

    #[error("Cannot flush the audit file: {0}")]
    FlushError(std::io::Error),

    #[error("Cannot read the audit file: {0}")]
    ReadError(csv::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
        }
    }
}

impl AuditTrail {
    /// Open (or create) the audit file at `path`.
    ///
    /// `node` names the executable writing the trail and is recorded in
    /// every row.
    pub fn new(path: &Path, node: &str) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(AuditError::OpenError)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(file);

        Ok(Self {
            path: path.to_path_buf(),
            node: node.to_string(),
            writer,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk.
    ///
    /// Each row is flushed as it is written so the trail survives an
    /// unclean shutdown.
    pub fn record(&mut self, level: AuditLevel, user: &str, message: &str) -> Result<(), AuditError> {
        let row = AuditRecord {
            timestamp: Utc::now().format(AUDIT_TIMESTAMP_FORMAT).to_string(),
            level: level.as_str().to_string(),
            message: message.to_string(),
            user: user.to_string(),
            node: self.node.clone(),
        };

        self.writer.serialize(&row).map_err(AuditError::WriteError)?;
        self.writer.flush().map_err(AuditError::FlushError)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Read every row of an audit file.
pub fn read_trail(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let mut reader = csv::Reader::from_path(path).map_err(AuditError::ReadError)?;

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result.map_err(AuditError::ReadError)?);
    }

    Ok(rows)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn temp_trail_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("arm_audit_{}_{}.csv", name, std::process::id()))
    }

    #[test]
    fn test_record_and_read_back() {
        let path = temp_trail_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let mut trail = AuditTrail::new(&path, "arm_exec").unwrap();
        trail
            .record(AuditLevel::Info, "alice", "robot.connect")
            .unwrap();
        trail
            .record(AuditLevel::Error, "bob", "robot.move (12, 0, 40)")
            .unwrap();

        let rows = read_trail(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].level, "INFO");
        assert_eq!(rows[0].user, "alice");
        assert_eq!(rows[0].node, "arm_exec");
        assert_eq!(rows[1].level, "ERROR");
        // Commas in the message must survive the CSV encoding
        assert_eq!(rows[1].message, "robot.move (12, 0, 40)");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_level_strings() {
        assert_eq!(AuditLevel::Info.as_str(), "INFO");
        assert_eq!(AuditLevel::Warning.as_str(), "WARNING");
        assert_eq!(AuditLevel::Error.as_str(), "ERROR");
    }
}
